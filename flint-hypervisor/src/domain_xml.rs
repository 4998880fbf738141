//! Domain description model, serializer and parser.
//!
//! Generated descriptions go through [`DomainDescriptor`], a small descriptor
//! model with a deterministic serializer. Mutation of existing descriptions
//! (cold-plug) goes through the narrow [`insert_before_devices_close`] helper
//! rather than ad-hoc string surgery at call sites.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{HypervisorError, Result};
use crate::types::{DiskDeviceKind, DiskInfo, NicInfo, NicSourceKind};

// =============================================================================
// DESCRIPTOR MODEL
// =============================================================================

/// Source of a disk device element.
#[derive(Debug, Clone)]
pub enum DiskSource {
    /// `<disk type='file'>` with a host path
    File(String),
    /// `<disk type='volume'>` referencing a pool volume
    Volume { pool: String, volume: String },
}

/// One block device in a composed description.
#[derive(Debug, Clone)]
pub struct DiskDevice {
    pub source: DiskSource,
    /// Target bus id (vda, sdb, hdc, ...)
    pub target: String,
    /// Bus name matching the target prefix (virtio, sata, ide)
    pub bus: String,
    pub device: DiskDeviceKind,
    pub format: String,
    pub readonly: bool,
}

impl DiskDevice {
    /// Primary virtio disk on `vda`.
    pub fn primary(source: DiskSource, format: &str) -> Self {
        Self {
            source,
            target: "vda".to_string(),
            bus: "virtio".to_string(),
            device: DiskDeviceKind::Disk,
            format: format.to_string(),
            readonly: false,
        }
    }

    /// Read-only CD-ROM on the given target.
    pub fn cdrom(path: &str, target: &str, bus: &str) -> Self {
        Self {
            source: DiskSource::File(path.to_string()),
            target: target.to_string(),
            bus: bus.to_string(),
            device: DiskDeviceKind::Cdrom,
            format: "raw".to_string(),
            readonly: true,
        }
    }
}

/// One interface in a composed description.
#[derive(Debug, Clone)]
pub struct NicDevice {
    pub mac: Option<String>,
    pub kind: NicSourceKind,
    pub source: String,
    pub model: String,
}

/// A composed domain description.
#[derive(Debug, Clone)]
pub struct DomainDescriptor {
    pub name: String,
    pub uuid: Option<String>,
    pub memory_mb: u64,
    pub vcpus: u32,
    pub disks: Vec<DiskDevice>,
    pub nics: Vec<NicDevice>,
}

impl DomainDescriptor {
    pub fn new(name: impl Into<String>, memory_mb: u64, vcpus: u32) -> Self {
        Self {
            name: name.into(),
            uuid: None,
            memory_mb,
            vcpus,
            disks: Vec::new(),
            nics: Vec::new(),
        }
    }

    pub fn with_disk(mut self, disk: DiskDevice) -> Self {
        self.disks.push(disk);
        self
    }

    pub fn with_nic(mut self, nic: NicDevice) -> Self {
        self.nics.push(nic);
        self
    }

    /// Serialize to libvirt domain XML.
    pub fn build(&self) -> String {
        let mut xml = String::new();

        xml.push_str(&format!(
            "<domain type='kvm'>\n  <name>{}</name>\n",
            escape(&self.name)
        ));
        if let Some(ref uuid) = self.uuid {
            xml.push_str(&format!("  <uuid>{}</uuid>\n", escape(uuid)));
        }
        xml.push_str(&format!(
            "  <memory unit='MiB'>{}</memory>\n  <vcpu placement='static'>{}</vcpu>\n",
            self.memory_mb, self.vcpus
        ));

        xml.push_str(
            r#"  <os>
    <type arch='x86_64' machine='pc'>hvm</type>
    <boot dev='hd'/>
    <boot dev='cdrom'/>
  </os>
  <features>
    <acpi/>
    <apic/>
  </features>
  <clock offset='utc'/>
  <on_poweroff>destroy</on_poweroff>
  <on_reboot>restart</on_reboot>
  <on_crash>destroy</on_crash>
"#,
        );

        xml.push_str("  <devices>\n");
        for disk in &self.disks {
            xml.push_str(&disk_element(disk));
        }
        for nic in &self.nics {
            xml.push_str(&nic_element(nic));
        }
        xml.push_str(
            r#"    <graphics type='vnc' port='-1' autoport='yes' listen='127.0.0.1'/>
    <serial type='pty'>
      <target port='0'/>
    </serial>
    <console type='pty'>
      <target type='serial' port='0'/>
    </console>
  </devices>
</domain>
"#,
        );

        xml
    }
}

/// Serialize a disk element, usable standalone for attach operations.
pub fn disk_element(disk: &DiskDevice) -> String {
    let mut xml = String::new();
    let (disk_type, source) = match &disk.source {
        DiskSource::File(path) => (
            "file",
            format!("      <source file='{}'/>\n", escape(path)),
        ),
        DiskSource::Volume { pool, volume } => (
            "volume",
            format!(
                "      <source pool='{}' volume='{}'/>\n",
                escape(pool),
                escape(volume)
            ),
        ),
    };

    xml.push_str(&format!(
        "    <disk type='{}' device='{}'>\n      <driver name='qemu' type='{}'/>\n",
        disk_type,
        disk.device.as_str(),
        escape(&disk.format)
    ));
    xml.push_str(&source);
    xml.push_str(&format!(
        "      <target dev='{}' bus='{}'/>\n",
        escape(&disk.target),
        escape(&disk.bus)
    ));
    if disk.readonly {
        xml.push_str("      <readonly/>\n");
    }
    xml.push_str("    </disk>\n");
    xml
}

/// Serialize an interface element, usable standalone for attach operations.
pub fn nic_element(nic: &NicDevice) -> String {
    let mut xml = String::new();
    let source = match nic.kind {
        NicSourceKind::Bridge => format!("      <source bridge='{}'/>\n", escape(&nic.source)),
        NicSourceKind::Network => format!("      <source network='{}'/>\n", escape(&nic.source)),
        NicSourceKind::Direct => {
            format!("      <source dev='{}' mode='bridge'/>\n", escape(&nic.source))
        }
    };

    xml.push_str(&format!("    <interface type='{}'>\n", nic.kind.as_str()));
    if let Some(ref mac) = nic.mac {
        xml.push_str(&format!("      <mac address='{}'/>\n", escape(mac)));
    }
    xml.push_str(&source);
    xml.push_str(&format!("      <model type='{}'/>\n", escape(&nic.model)));
    xml.push_str("    </interface>\n");
    xml
}

/// Escape text for inclusion in XML content or single-quoted attributes.
fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}

// =============================================================================
// SPLICING
// =============================================================================

const DEVICES_CLOSE: &str = "</devices>";

/// Insert a device fragment immediately before the devices-close token.
///
/// This is the only sanctioned mutation of an existing description; the
/// fragment itself must come from [`disk_element`] or [`nic_element`].
pub fn insert_before_devices_close(xml: &str, fragment: &str) -> Result<String> {
    let idx = xml.rfind(DEVICES_CLOSE).ok_or_else(|| {
        HypervisorError::Integrity("domain description has no devices element".to_string())
    })?;
    let mut out = String::with_capacity(xml.len() + fragment.len());
    out.push_str(&xml[..idx]);
    out.push_str(fragment);
    out.push_str(&xml[idx..]);
    Ok(out)
}

// =============================================================================
// PARSING
// =============================================================================

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Parse the first `<name>` and `<uuid>` out of a description.
///
/// Works for domain and network descriptions alike, where both elements are
/// direct children of the root and precede any device subtrees.
pub fn parse_identity(xml: &str) -> Result<(String, Option<String>)> {
    let mut reader = Reader::from_str(xml);
    let mut name = None;
    let mut uuid = None;
    let mut capture: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                capture = match e.name().as_ref() {
                    b"name" if name.is_none() => Some("name"),
                    b"uuid" if uuid.is_none() => Some("uuid"),
                    _ => None,
                };
            }
            Ok(Event::Text(t)) => {
                if let Some(which) = capture {
                    let text = t
                        .unescape()
                        .map_err(|e| HypervisorError::Integrity(e.to_string()))?
                        .trim()
                        .to_string();
                    match which {
                        "name" => name = Some(text),
                        _ => uuid = Some(text),
                    }
                }
            }
            Ok(Event::End(_)) => capture = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(HypervisorError::Integrity(e.to_string())),
            _ => {}
        }
    }

    let name =
        name.ok_or_else(|| HypervisorError::Integrity("description has no name".to_string()))?;
    Ok((name, uuid))
}

/// Parse `<memory>` (MiB) and `<vcpu>` out of a domain description.
pub fn parse_resources(xml: &str) -> Result<(u64, u32)> {
    let mut reader = Reader::from_str(xml);
    let mut memory_mb = 0u64;
    let mut vcpus = 0u32;
    let mut capture: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                capture = match e.name().as_ref() {
                    b"memory" => Some("memory"),
                    b"vcpu" => Some("vcpu"),
                    _ => None,
                };
            }
            Ok(Event::Text(t)) => {
                if let Some(which) = capture {
                    let text = t
                        .unescape()
                        .map_err(|e| HypervisorError::Integrity(e.to_string()))?
                        .trim()
                        .to_string();
                    match which {
                        "memory" => memory_mb = text.parse().unwrap_or(0),
                        _ => vcpus = text.parse().unwrap_or(0),
                    }
                }
            }
            Ok(Event::End(_)) => capture = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(HypervisorError::Integrity(e.to_string())),
            _ => {}
        }
    }

    Ok((memory_mb, vcpus))
}

/// Parse the disk and interface elements of a domain description.
pub fn parse_devices(xml: &str) -> Result<(Vec<DiskInfo>, Vec<NicInfo>)> {
    let mut reader = Reader::from_str(xml);
    let mut disks = Vec::new();
    let mut nics = Vec::new();

    // Current element being accumulated, if any
    let mut disk: Option<DiskInfo> = None;
    let mut nic: Option<NicInfo> = None;

    loop {
        let event = match reader.read_event() {
            Ok(ev) => ev,
            Err(e) => return Err(HypervisorError::Integrity(e.to_string())),
        };
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                match e.name().as_ref() {
                    b"disk" => {
                        let device = match attr_value(e, b"device").as_deref() {
                            Some("cdrom") => DiskDeviceKind::Cdrom,
                            _ => DiskDeviceKind::Disk,
                        };
                        disk = Some(DiskInfo {
                            source: String::new(),
                            pool: None,
                            target: String::new(),
                            device,
                            format: String::new(),
                            readonly: false,
                        });
                    }
                    b"interface" => {
                        let kind = match attr_value(e, b"type").as_deref() {
                            Some("bridge") => NicSourceKind::Bridge,
                            Some("direct") => NicSourceKind::Direct,
                            _ => NicSourceKind::Network,
                        };
                        nic = Some(NicInfo {
                            mac: String::new(),
                            source_kind: kind,
                            source_name: String::new(),
                            model: String::new(),
                        });
                    }
                    b"driver" => {
                        if let Some(ref mut d) = disk {
                            if let Some(fmt) = attr_value(e, b"type") {
                                d.format = fmt;
                            }
                        }
                    }
                    b"source" => {
                        if let Some(ref mut d) = disk {
                            d.source = attr_value(e, b"file")
                                .or_else(|| attr_value(e, b"dev"))
                                .or_else(|| attr_value(e, b"volume"))
                                .unwrap_or_default();
                            d.pool = attr_value(e, b"pool");
                        } else if let Some(ref mut n) = nic {
                            n.source_name = attr_value(e, b"network")
                                .or_else(|| attr_value(e, b"bridge"))
                                .or_else(|| attr_value(e, b"dev"))
                                .unwrap_or_default();
                        }
                    }
                    b"target" => {
                        if let Some(ref mut d) = disk {
                            if let Some(dev) = attr_value(e, b"dev") {
                                d.target = dev;
                            }
                        }
                    }
                    b"readonly" => {
                        if let Some(ref mut d) = disk {
                            d.readonly = true;
                        }
                    }
                    b"mac" => {
                        if let Some(ref mut n) = nic {
                            if let Some(mac) = attr_value(e, b"address") {
                                n.mac = mac;
                            }
                        }
                    }
                    b"model" => {
                        if let Some(ref mut n) = nic {
                            if let Some(model) = attr_value(e, b"type") {
                                n.model = model;
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::End(ref e) => match e.name().as_ref() {
                b"disk" => {
                    if let Some(d) = disk.take() {
                        disks.push(d);
                    }
                }
                b"interface" => {
                    if let Some(n) = nic.take() {
                        nics.push(n);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok((disks, nics))
}

/// Target bus ids currently in use by any disk element.
pub fn used_disk_targets(xml: &str) -> Result<Vec<String>> {
    let (disks, _) = parse_devices(xml)?;
    Ok(disks.into_iter().map(|d| d.target).collect())
}

/// Count interface elements; used as the host-level active-interface proxy.
pub fn count_interfaces(xml: &str) -> usize {
    match parse_devices(xml) {
        Ok((_, nics)) => nics.len(),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_descriptor() -> DomainDescriptor {
        DomainDescriptor::new("web-01", 2048, 2)
            .with_disk(DiskDevice::primary(
                DiskSource::Volume {
                    pool: "default".to_string(),
                    volume: "web-01-disk-0.qcow2".to_string(),
                },
                "qcow2",
            ))
            .with_nic(NicDevice {
                mac: Some("52:54:00:aa:bb:cc".to_string()),
                kind: NicSourceKind::Network,
                source: "default".to_string(),
                model: "virtio".to_string(),
            })
    }

    #[test]
    fn build_contains_required_elements() {
        let xml = sample_descriptor().build();
        assert!(xml.contains("<domain type='kvm'>"));
        assert!(xml.contains("<name>web-01</name>"));
        assert!(xml.contains("<memory unit='MiB'>2048</memory>"));
        assert!(xml.contains("<vcpu placement='static'>2</vcpu>"));
        assert!(xml.contains("<type arch='x86_64' machine='pc'>hvm</type>"));
        assert!(xml.contains("<graphics type='vnc' port='-1' autoport='yes'"));
        assert!(xml.contains("<serial type='pty'>"));
        assert!(xml.contains("<console type='pty'>"));
        assert!(xml.contains("<source pool='default' volume='web-01-disk-0.qcow2'/>"));
        assert!(xml.contains("<target dev='vda' bus='virtio'/>"));
    }

    #[test]
    fn build_parses_back() {
        let xml = sample_descriptor().build();
        let (disks, nics) = parse_devices(&xml).unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].target, "vda");
        assert_eq!(disks[0].device, DiskDeviceKind::Disk);
        assert_eq!(disks[0].format, "qcow2");
        assert_eq!(nics.len(), 1);
        assert_eq!(nics[0].mac, "52:54:00:aa:bb:cc");
        assert_eq!(nics[0].source_kind, NicSourceKind::Network);
        assert_eq!(nics[0].source_name, "default");

        let (name, _) = parse_identity(&xml).unwrap();
        assert_eq!(name, "web-01");
    }

    #[test]
    fn cdrom_element_is_readonly() {
        let xml = sample_descriptor()
            .with_disk(DiskDevice::cdrom("/var/lib/flint/images/ubuntu.iso", "sdb", "sata"))
            .build();
        let (disks, _) = parse_devices(&xml).unwrap();
        let cdrom = disks.iter().find(|d| d.target == "sdb").unwrap();
        assert_eq!(cdrom.device, DiskDeviceKind::Cdrom);
        assert!(cdrom.readonly);
        assert_eq!(cdrom.source, "/var/lib/flint/images/ubuntu.iso");
    }

    #[test]
    fn splice_inserts_before_close() {
        let xml = sample_descriptor().build();
        let fragment = disk_element(&DiskDevice::cdrom("/tmp/seed.iso", "hdc", "ide"));
        let spliced = insert_before_devices_close(&xml, &fragment).unwrap();

        let close = spliced.find("</devices>").unwrap();
        let frag = spliced.find("hdc").unwrap();
        assert!(frag < close);

        let (disks, _) = parse_devices(&spliced).unwrap();
        assert!(disks.iter().any(|d| d.target == "hdc"));
    }

    #[test]
    fn splice_without_devices_fails() {
        let err = insert_before_devices_close("<domain/>", "<disk/>").unwrap_err();
        assert!(matches!(err, HypervisorError::Integrity(_)));
    }

    #[test]
    fn name_is_escaped() {
        let xml = DomainDescriptor::new("a<b&c", 512, 1).build();
        assert!(xml.contains("<name>a&lt;b&amp;c</name>"));
        let (name, _) = parse_identity(&xml).unwrap();
        assert_eq!(name, "a<b&c");
    }

    #[test]
    fn used_targets_and_interface_count() {
        let xml = sample_descriptor()
            .with_disk(DiskDevice::cdrom("/tmp/a.iso", "hdc", "ide"))
            .build();
        let targets = used_disk_targets(&xml).unwrap();
        assert_eq!(targets, vec!["vda".to_string(), "hdc".to_string()]);
        assert_eq!(count_interfaces(&xml), 1);
    }
}
