//! Type definitions for domains, storage, networks, images and samples.

use serde::{Deserialize, Serialize};

use crate::error::{HypervisorError, Result};

// =============================================================================
// DOMAIN LIFECYCLE
// =============================================================================

/// Domain lifecycle state as reported by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainState {
    NoState,
    Running,
    Blocked,
    Paused,
    Shutdown,
    Shutoff,
    Crashed,
    Suspended,
}

impl DomainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainState::NoState => "nostate",
            DomainState::Running => "running",
            DomainState::Blocked => "blocked",
            DomainState::Paused => "paused",
            DomainState::Shutdown => "shutdown",
            DomainState::Shutoff => "shutoff",
            DomainState::Crashed => "crashed",
            DomainState::Suspended => "suspended",
        }
    }

    /// Whether the domain is consuming CPU right now.
    pub fn is_active(&self) -> bool {
        matches!(self, DomainState::Running | DomainState::Blocked)
    }
}

impl Default for DomainState {
    fn default() -> Self {
        Self::NoState
    }
}

/// Lifecycle verb accepted by the domain action endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleAction {
    Start,
    Stop,
    Reboot,
    ForceStop,
    Pause,
    Resume,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Reboot => "reboot",
            LifecycleAction::ForceStop => "force-stop",
            LifecycleAction::Pause => "pause",
            LifecycleAction::Resume => "resume",
        }
    }

    /// Parse an action string from the API.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(LifecycleAction::Start),
            "stop" => Ok(LifecycleAction::Stop),
            "reboot" => Ok(LifecycleAction::Reboot),
            "force-stop" => Ok(LifecycleAction::ForceStop),
            "pause" => Ok(LifecycleAction::Pause),
            "resume" => Ok(LifecycleAction::Resume),
            other => Err(HypervisorError::InvalidArgument(format!(
                "unknown domain action: {other}"
            ))),
        }
    }
}

// =============================================================================
// DOMAIN RECORDS
// =============================================================================

/// Raw per-domain runtime counters as read from the hypervisor in one shot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRuntime {
    /// Domain UUID (canonical hyphenated form)
    pub uuid: String,
    /// Domain name (unique per host)
    pub name: String,
    /// Current lifecycle state
    pub state: DomainState,
    /// Current memory in KiB
    pub memory_kb: u64,
    /// Maximum memory in KiB
    pub max_memory_kb: u64,
    /// Current vCPU count
    pub vcpus: u32,
    /// Cumulative CPU time in nanoseconds (monotonic across the domain lifetime)
    pub cpu_time_ns: u64,
}

/// Domain summary returned by the list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSummary {
    pub uuid: String,
    pub name: String,
    pub state: DomainState,
    /// CPU utilization over the sample window.
    ///
    /// Not normalized by vCPU count: a 4-vCPU domain saturating all cores
    /// reports ~400. This is a fixed contract.
    pub cpu_percent: f64,
    pub memory_kb: u64,
    pub max_memory_kb: u64,
    pub vcpus: u32,
    /// Best-effort guest OS hint (guest agent, falling back to the description)
    pub os_hint: String,
    /// Observed guest IP addresses; empty when the agent is unreachable
    pub ip_addresses: Vec<String>,
}

/// Full domain details including the parsed device list and raw description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainDetails {
    pub uuid: String,
    pub name: String,
    pub state: DomainState,
    pub memory_kb: u64,
    pub max_memory_kb: u64,
    pub vcpus: u32,
    pub os_hint: String,
    pub ip_addresses: Vec<String>,
    pub disks: Vec<DiskInfo>,
    pub nics: Vec<NicInfo>,
    /// Raw hypervisor description, returned for auditing
    pub xml: String,
}

// =============================================================================
// DEVICES
// =============================================================================

/// Device kind of a block device element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskDeviceKind {
    Disk,
    Cdrom,
}

impl DiskDeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskDeviceKind::Disk => "disk",
            DiskDeviceKind::Cdrom => "cdrom",
        }
    }
}

/// A disk as parsed from a domain description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInfo {
    /// Source path (file disks) or volume name (volume disks)
    pub source: String,
    /// Owning pool for volume-sourced disks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    /// Target bus id (vda, sdb, hdc, ...)
    pub target: String,
    pub device: DiskDeviceKind,
    /// Backing format (qcow2, raw)
    pub format: String,
    pub readonly: bool,
}

/// Network attachment kind of an interface element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NicSourceKind {
    Network,
    Bridge,
    Direct,
}

impl NicSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NicSourceKind::Network => "network",
            NicSourceKind::Bridge => "bridge",
            NicSourceKind::Direct => "direct",
        }
    }

    /// Resolve the attachment kind for a user-supplied source name.
    ///
    /// Names beginning with `br` refer to host bridges; everything else is
    /// treated as a libvirt virtual network.
    pub fn from_source_name(name: &str) -> Self {
        if name.starts_with("br") || name.starts_with("virbr") {
            NicSourceKind::Bridge
        } else {
            NicSourceKind::Network
        }
    }
}

/// A NIC as parsed from a domain description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NicInfo {
    pub mac: String,
    pub source_kind: NicSourceKind,
    pub source_name: String,
    pub model: String,
}

/// Generate a random MAC address in the locally administered QEMU range.
pub fn generate_mac_address() -> String {
    let bytes: [u8; 3] = rand::random();
    format!("52:54:00:{:02x}:{:02x}:{:02x}", bytes[0], bytes[1], bytes[2])
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Parsed snapshot metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub name: String,
    pub description: String,
    /// Domain state captured at snapshot time
    pub state: String,
    /// Creation timestamp, when present in the metadata
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

// =============================================================================
// STORAGE
// =============================================================================

/// Storage pool state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    Inactive,
    Building,
    Active,
    Degraded,
    Inaccessible,
    Unknown,
}

impl PoolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolState::Inactive => "inactive",
            PoolState::Building => "building",
            PoolState::Active => "active",
            PoolState::Degraded => "degraded",
            PoolState::Inaccessible => "inaccessible",
            PoolState::Unknown => "unknown",
        }
    }
}

/// A storage pool as reported by the hypervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolRuntime {
    pub name: String,
    pub state: PoolState,
    pub capacity_b: u64,
    pub allocation_b: u64,
    /// Target directory of the pool on the host filesystem
    pub path: String,
}

/// A volume inside a storage pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRuntime {
    pub name: String,
    pub pool: String,
    /// Absolute path on the host
    pub path: String,
    pub capacity_b: u64,
    pub format: String,
}

// =============================================================================
// NETWORKS
// =============================================================================

/// A virtual network as reported by the hypervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRuntime {
    pub name: String,
    pub uuid: String,
    pub bridge: String,
    pub active: bool,
    pub persistent: bool,
}

/// Verb accepted by the network update endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkAction {
    Start,
    Stop,
    Restart,
}

impl NetworkAction {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(NetworkAction::Start),
            "stop" => Ok(NetworkAction::Stop),
            "restart" => Ok(NetworkAction::Restart),
            other => Err(HypervisorError::InvalidArgument(format!(
                "unknown network action: {other}"
            ))),
        }
    }
}

// =============================================================================
// IMAGES
// =============================================================================

/// Managed image kind, which determines the default attachment behavior
/// during domain creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    /// Installer media attached as a boot CD-ROM
    Iso,
    /// Cloud image used as an overlay backing file
    Template,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Iso => "iso",
            ImageKind::Template => "template",
        }
    }
}

/// A catalog entry in the image library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub name: String,
    pub kind: ImageKind,
    pub size_b: u64,
    pub os_hint: Option<String>,
    /// Absolute path under the library root
    pub path: String,
}

// =============================================================================
// SAMPLES & HOST STATUS
// =============================================================================

/// One point of per-domain performance counters.
///
/// Two samples plus the elapsed time between them yield rates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub cpu_time_ns: u64,
    pub memory_rss_kb: u64,
    pub disk_read_b: u64,
    pub disk_write_b: u64,
    pub net_rx_b: u64,
    pub net_tx_b: u64,
}

/// Host-level CPU/memory counters from the hypervisor node info.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeResources {
    pub cpu_cores: u32,
    pub total_memory_kb: u64,
    pub free_memory_kb: u64,
}

/// Aggregated host capacity with storage deduplicated by filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostResources {
    pub cpu_cores: u32,
    pub total_memory_kb: u64,
    pub free_memory_kb: u64,
    pub storage_total_b: u64,
    pub storage_used_b: u64,
    pub active_interfaces: u32,
}

/// Severity of the composed host health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Info,
    Warning,
    Error,
}

/// Composed host health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostHealth {
    pub level: HealthLevel,
    pub messages: Vec<String>,
    pub active_domains: u32,
    pub total_domains: u32,
}

/// Guest agent reachability plus identifying info retrieved over it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuestAgentStatus {
    pub available: bool,
    pub os_name: Option<String>,
    pub hostname: Option<String>,
    pub ip_addresses: Vec<String>,
}

// =============================================================================
// CREATION SPECS
// =============================================================================

/// VM creation request handled by the domain composer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmCreateSpec {
    pub name: String,
    pub memory_mb: u64,
    pub vcpus: u32,
    /// Pool the primary disk is provisioned in
    pub disk_pool: String,
    pub disk_size_gb: u64,
    /// Name of a library image resolved at creation time
    pub image_name: String,
    pub image_kind: ImageKind,
    #[serde(default)]
    pub enable_cloud_init: bool,
    #[serde(default)]
    pub cloud_init: Option<CloudInitSpec>,
    #[serde(default)]
    pub start_on_create: bool,
    /// NIC source; names beginning with `br` select bridge attachment
    pub network_name: String,
}

/// Guided cloud-init parameters.
///
/// When `user_data` is set it is used verbatim and every other field except
/// `hostname` is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudInitSpec {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Authorized keys, one per line
    #[serde(default)]
    pub ssh_keys: Option<String>,
    /// Raw user-data used verbatim when present
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub network: Option<CloudInitNetwork>,
}

/// Guest network block for the guided cloud-init document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudInitNetwork {
    /// DHCPv4 on the first ethernet when true
    #[serde(default)]
    pub dhcp: bool,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub prefix: Option<u8>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub dns: Vec<String>,
}

/// Disk attach request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachDiskSpec {
    /// Pool holding an existing volume to attach
    #[serde(default)]
    pub pool: Option<String>,
    /// Volume name within `pool`
    #[serde(default)]
    pub volume: Option<String>,
    /// Direct file path, used when no pool/volume pair is given
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_disk_format")]
    pub format: String,
}

fn default_disk_format() -> String {
    "qcow2".to_string()
}

/// NIC attach request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachNicSpec {
    /// Bridge or network name; `br*` prefixes select bridge attachment
    pub source: String,
    #[serde(default = "default_nic_model")]
    pub model: String,
    #[serde(default)]
    pub mac: Option<String>,
}

fn default_nic_model() -> String {
    "virtio".to_string()
}

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Validate a canonical hyphenated UUID (8-4-4-4-12, hex only).
pub fn validate_uuid(s: &str) -> Result<()> {
    let groups: Vec<&str> = s.split('-').collect();
    let lens = [8, 4, 4, 4, 12];
    let well_formed = groups.len() == 5
        && groups
            .iter()
            .zip(lens.iter())
            .all(|(g, l)| g.len() == *l && g.chars().all(|c| c.is_ascii_hexdigit()));
    if well_formed {
        Ok(())
    } else {
        Err(HypervisorError::InvalidArgument(format!(
            "malformed domain id: {s}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parsing() {
        assert_eq!(LifecycleAction::parse("start").unwrap(), LifecycleAction::Start);
        assert_eq!(
            LifecycleAction::parse("force-stop").unwrap(),
            LifecycleAction::ForceStop
        );
        assert!(LifecycleAction::parse("explode").is_err());
    }

    #[test]
    fn nic_source_heuristic() {
        assert_eq!(NicSourceKind::from_source_name("br0"), NicSourceKind::Bridge);
        assert_eq!(NicSourceKind::from_source_name("virbr0"), NicSourceKind::Bridge);
        assert_eq!(NicSourceKind::from_source_name("default"), NicSourceKind::Network);
    }

    #[test]
    fn uuid_validation() {
        assert!(validate_uuid("f47ac10b-58cc-4372-a567-0e02b2c3d479").is_ok());
        assert!(validate_uuid("F47AC10B-58CC-4372-A567-0E02B2C3D479").is_ok());
        assert!(validate_uuid("f47ac10b58cc4372a5670e02b2c3d479").is_err());
        assert!(validate_uuid("not-a-uuid").is_err());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("f47ac10b-58cc-4372-a567-0e02b2c3d47z").is_err());
    }

    #[test]
    fn generated_mac_is_qemu_local() {
        let mac = generate_mac_address();
        assert!(mac.starts_with("52:54:00:"));
        assert_eq!(mac.len(), 17);
    }
}
