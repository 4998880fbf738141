//! Virtual network definition helpers.
//!
//! Flint-created networks are NAT /24s in 192.168.0.0/16 with the third
//! octet allocated uniquely across all defined networks on the host.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{HypervisorError, Result};

/// Allocation range for the /24 third octet.
pub const OCTET_RANGE: std::ops::RangeInclusive<u8> = 100..=254;

/// Name of the hypervisor-provided network that must never be deleted.
pub const RESERVED_NETWORK: &str = "default";

/// Build the definition for a NAT network on `192.168.<octet>.0/24`.
///
/// The host takes `.1`; DHCP hands out `.10` through `.254`.
pub fn network_definition_xml(name: &str, bridge: &str, octet: u8) -> String {
    format!(
        r#"<network>
  <name>{name}</name>
  <forward mode='nat'/>
  <bridge name='{bridge}' stp='on' delay='0'/>
  <ip address='192.168.{octet}.1' netmask='255.255.255.0'>
    <dhcp>
      <range start='192.168.{octet}.10' end='192.168.{octet}.254'/>
    </dhcp>
  </ip>
</network>
"#
    )
}

/// Third octets of all `192.168.x.y` host addresses in a network definition.
///
/// Networks outside 192.168/16 contribute nothing, which keeps them invisible
/// to the allocator.
pub fn subnet_octets(xml: &str) -> Vec<u8> {
    let mut reader = Reader::from_str(xml);
    let mut octets = Vec::new();

    loop {
        let event = match reader.read_event() {
            Ok(ev) => ev,
            Err(_) => break,
        };
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if e.name().as_ref() == b"ip" {
                    let address = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"address")
                        .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                    if let Some(addr) = address {
                        if let Some(octet) = third_octet(&addr) {
                            octets.push(octet);
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    octets
}

fn third_octet(address: &str) -> Option<u8> {
    let rest = address.strip_prefix("192.168.")?;
    let octet = rest.split('.').next()?;
    octet.parse().ok()
}

/// Pick the lowest free third octet, refusing on exhaustion.
pub fn allocate_third_octet(used: &[u8]) -> Result<u8> {
    OCTET_RANGE
        .clone()
        .find(|octet| !used.contains(octet))
        .ok_or_else(|| {
            HypervisorError::Conflict("no free /24 subnet in the 192.168 range".to_string())
        })
}
