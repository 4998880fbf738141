//! QEMU guest agent protocol helpers.
//!
//! Commands are JSON documents sent over the agent channel; responses wrap
//! their payload in a `return` field. Parsing is tolerant: a malformed or
//! missing field degrades to `None` rather than failing the caller, since
//! agent availability is always best-effort.

use serde_json::{json, Value};

/// `guest-ping` command body.
pub fn ping_command() -> String {
    json!({"execute": "guest-ping"}).to_string()
}

/// `guest-get-osinfo` command body.
pub fn osinfo_command() -> String {
    json!({"execute": "guest-get-osinfo"}).to_string()
}

/// `guest-get-host-name` command body.
pub fn hostname_command() -> String {
    json!({"execute": "guest-get-host-name"}).to_string()
}

/// `guest-network-get-interfaces` command body.
pub fn interfaces_command() -> String {
    json!({"execute": "guest-network-get-interfaces"}).to_string()
}

fn parse_return(response: &str) -> Option<Value> {
    serde_json::from_str::<Value>(response)
        .ok()?
        .get("return")
        .cloned()
}

/// OS name from a `guest-get-osinfo` response, preferring the pretty name.
pub fn parse_os_name(response: &str) -> Option<String> {
    let ret = parse_return(response)?;
    ret.get("pretty-name")
        .or_else(|| ret.get("name"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Hostname from a `guest-get-host-name` response.
pub fn parse_hostname(response: &str) -> Option<String> {
    parse_return(response)?
        .get("host-name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// All guest addresses from a `guest-network-get-interfaces` response,
/// already filtered of loopback and link-local noise.
pub fn parse_ip_addresses(response: &str) -> Vec<String> {
    let Some(ret) = parse_return(response) else {
        return Vec::new();
    };
    let Some(interfaces) = ret.as_array() else {
        return Vec::new();
    };

    let mut addresses = Vec::new();
    for iface in interfaces {
        let Some(addrs) = iface.get("ip-addresses").and_then(|a| a.as_array()) else {
            continue;
        };
        for addr in addrs {
            if let Some(ip) = addr.get("ip-address").and_then(|v| v.as_str()) {
                if is_reportable_ip(ip) {
                    addresses.push(ip.to_string());
                }
            }
        }
    }
    addresses
}

/// Reject loopback and link-local addresses from guest reports.
pub fn is_reportable_ip(ip: &str) -> bool {
    !(ip == "127.0.0.1"
        || ip == "::1"
        || ip.starts_with("169.254.")
        || ip.to_lowercase().starts_with("fe80:"))
}
