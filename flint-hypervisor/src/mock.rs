//! In-memory hypervisor backend for development and tests.
//!
//! State lives in process memory; volumes are real files under a temp
//! directory so path-based safety checks behave like production. Counters
//! advance deterministically so the sampler has something to difference.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::console::{channel_pair, ConsoleChannel};
use crate::domain_xml;
use crate::error::{HypervisorError, Result};
use crate::network::network_definition_xml;
use crate::snapshots;
use crate::traits::Hypervisor;
use crate::types::*;

/// CPU time added to a running domain on every runtime read.
const CPU_TICK_NS: u64 = 250_000_000;

struct MockDomain {
    uuid: String,
    name: String,
    state: DomainState,
    memory_kb: u64,
    max_memory_kb: u64,
    vcpus: u32,
    cpu_time_ns: u64,
    xml: String,
    /// Ordered oldest-first: (name, metadata XML)
    snapshots: Vec<(String, String)>,
    /// Canned guest-agent responses keyed by command name
    agent_responses: HashMap<String, String>,
}

struct MockVolume {
    record: VolumeRuntime,
}

struct MockPool {
    name: String,
    path: PathBuf,
    capacity_b: u64,
    allocation_b: u64,
    state: PoolState,
    volumes: HashMap<String, MockVolume>,
}

struct MockNetwork {
    record: NetworkRuntime,
    xml: String,
    autostart: bool,
}

#[derive(Default)]
struct MockState {
    domains: HashMap<String, MockDomain>,
    pools: HashMap<String, MockPool>,
    networks: HashMap<String, MockNetwork>,
    /// Fake `qemu-img info` virtual sizes (bytes) for backing images
    image_sizes: HashMap<PathBuf, u64>,
}

/// Mock backend holding all state in memory.
pub struct MockHypervisor {
    state: RwLock<MockState>,
    // Keeps pool directories alive for the backend's lifetime
    _storage_root: tempfile::TempDir,
}

impl MockHypervisor {
    /// Create a mock with a `default` pool and the reserved `default` network.
    pub fn new() -> Self {
        let storage_root = tempfile::tempdir().expect("mock storage root");
        let default_pool_path = storage_root.path().join("default");
        std::fs::create_dir_all(&default_pool_path).expect("mock pool dir");

        let mut state = MockState::default();
        state.pools.insert(
            "default".to_string(),
            MockPool {
                name: "default".to_string(),
                path: default_pool_path,
                capacity_b: 100 * 1024 * 1024 * 1024,
                allocation_b: 0,
                state: PoolState::Active,
                volumes: HashMap::new(),
            },
        );
        state.networks.insert(
            "default".to_string(),
            MockNetwork {
                record: NetworkRuntime {
                    name: "default".to_string(),
                    uuid: Uuid::new_v4().to_string(),
                    bridge: "virbr0".to_string(),
                    active: true,
                    persistent: true,
                },
                xml: network_definition_xml("default", "virbr0", 122),
                autostart: true,
            },
        );

        Self {
            state: RwLock::new(state),
            _storage_root: storage_root,
        }
    }

    /// Record a fake virtual size (bytes) for a backing image path.
    pub async fn set_image_virtual_size(&self, path: &Path, size_b: u64) {
        self.state
            .write()
            .await
            .image_sizes
            .insert(path.to_path_buf(), size_b);
    }

    /// Install a canned guest-agent response for a domain.
    pub async fn set_agent_response(&self, uuid: &str, command: &str, response: &str) {
        if let Some(domain) = self.state.write().await.domains.get_mut(uuid) {
            domain
                .agent_responses
                .insert(command.to_string(), response.to_string());
        }
    }

    fn runtime_of(domain: &MockDomain) -> DomainRuntime {
        DomainRuntime {
            uuid: domain.uuid.clone(),
            name: domain.name.clone(),
            state: domain.state,
            memory_kb: domain.memory_kb,
            max_memory_kb: domain.max_memory_kb,
            vcpus: domain.vcpus,
            cpu_time_ns: domain.cpu_time_ns,
        }
    }
}

impl Default for MockHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(what: &str, id: &str) -> HypervisorError {
    HypervisorError::NotFound(format!("{what} not found: {id}"))
}

#[async_trait]
impl Hypervisor for MockHypervisor {
    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }

    async fn node_resources(&self) -> Result<NodeResources> {
        Ok(NodeResources {
            cpu_cores: 8,
            total_memory_kb: 16 * 1024 * 1024,
            free_memory_kb: 8 * 1024 * 1024,
        })
    }

    async fn list_domains(&self) -> Result<Vec<DomainRuntime>> {
        let state = self.state.read().await;
        let mut domains: Vec<DomainRuntime> =
            state.domains.values().map(Self::runtime_of).collect();
        domains.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(domains)
    }

    async fn domain_runtime(&self, uuid: &str) -> Result<DomainRuntime> {
        let mut state = self.state.write().await;
        let domain = state
            .domains
            .get_mut(uuid)
            .ok_or_else(|| not_found("domain", uuid))?;
        if domain.state == DomainState::Running {
            domain.cpu_time_ns += CPU_TICK_NS;
        }
        Ok(Self::runtime_of(domain))
    }

    async fn domain_xml(&self, uuid: &str) -> Result<String> {
        let state = self.state.read().await;
        state
            .domains
            .get(uuid)
            .map(|d| d.xml.clone())
            .ok_or_else(|| not_found("domain", uuid))
    }

    async fn define_domain(&self, xml: &str) -> Result<String> {
        let (name, uuid) = domain_xml::parse_identity(xml)?;
        let (memory_mb, vcpus) = domain_xml::parse_resources(xml)?;
        let mut state = self.state.write().await;

        if state.domains.values().any(|d| d.name == name) {
            return Err(HypervisorError::Conflict(format!(
                "domain already exists: {name}"
            )));
        }

        let uuid = uuid.unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!(name = %name, uuid = %uuid, "Mock domain defined");
        state.domains.insert(
            uuid.clone(),
            MockDomain {
                uuid: uuid.clone(),
                name,
                state: DomainState::Shutoff,
                memory_kb: memory_mb * 1024,
                max_memory_kb: memory_mb * 1024,
                vcpus,
                cpu_time_ns: 0,
                xml: xml.to_string(),
                snapshots: Vec::new(),
                agent_responses: HashMap::new(),
            },
        );
        Ok(uuid)
    }

    async fn redefine_domain(&self, xml: &str) -> Result<()> {
        let (name, _) = domain_xml::parse_identity(xml)?;
        let mut state = self.state.write().await;
        let domain = state
            .domains
            .values_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| not_found("domain", &name))?;
        domain.xml = xml.to_string();
        let (memory_mb, vcpus) = domain_xml::parse_resources(xml)?;
        domain.memory_kb = memory_mb * 1024;
        domain.max_memory_kb = memory_mb * 1024;
        domain.vcpus = vcpus;
        Ok(())
    }

    async fn undefine_domain(&self, uuid: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .domains
            .remove(uuid)
            .map(|_| ())
            .ok_or_else(|| not_found("domain", uuid))
    }

    async fn domain_action(&self, uuid: &str, action: LifecycleAction) -> Result<()> {
        let mut state = self.state.write().await;
        let domain = state
            .domains
            .get_mut(uuid)
            .ok_or_else(|| not_found("domain", uuid))?;

        let current = domain.state;
        domain.state = match (action, current) {
            (LifecycleAction::Start, DomainState::Shutoff) => DomainState::Running,
            (LifecycleAction::Start, DomainState::Running) => {
                return Err(HypervisorError::Precondition(
                    "domain is already running".to_string(),
                ))
            }
            (LifecycleAction::Stop, DomainState::Running) => DomainState::Shutoff,
            (LifecycleAction::ForceStop, _) => DomainState::Shutoff,
            (LifecycleAction::Reboot, DomainState::Running) => DomainState::Running,
            (LifecycleAction::Pause, DomainState::Running) => DomainState::Paused,
            (LifecycleAction::Resume, DomainState::Paused) => DomainState::Running,
            (action, state) => {
                return Err(HypervisorError::Precondition(format!(
                    "cannot {} a {} domain",
                    action.as_str(),
                    state.as_str()
                )))
            }
        };
        Ok(())
    }

    async fn attach_device(&self, uuid: &str, device_xml: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let domain = state
            .domains
            .get_mut(uuid)
            .ok_or_else(|| not_found("domain", uuid))?;
        if domain.state != DomainState::Running {
            return Err(HypervisorError::Conflict(
                "hot-plug requires a running domain".to_string(),
            ));
        }
        domain.xml = domain_xml::insert_before_devices_close(&domain.xml, device_xml)?;
        Ok(())
    }

    async fn performance_counters(&self, uuid: &str) -> Result<PerformanceSample> {
        let state = self.state.read().await;
        let domain = state
            .domains
            .get(uuid)
            .ok_or_else(|| not_found("domain", uuid))?;
        Ok(PerformanceSample {
            cpu_time_ns: domain.cpu_time_ns,
            memory_rss_kb: domain.memory_kb,
            disk_read_b: domain.cpu_time_ns / 1000,
            disk_write_b: domain.cpu_time_ns / 2000,
            net_rx_b: domain.cpu_time_ns / 4000,
            net_tx_b: domain.cpu_time_ns / 8000,
        })
    }

    async fn guest_agent_command(
        &self,
        uuid: &str,
        command_json: &str,
        _timeout_secs: i32,
    ) -> Result<Option<String>> {
        let command: serde_json::Value = serde_json::from_str(command_json)
            .map_err(|e| HypervisorError::InvalidArgument(format!("bad agent command: {e}")))?;
        let name = command
            .get("execute")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let state = self.state.read().await;
        let domain = state
            .domains
            .get(uuid)
            .ok_or_else(|| not_found("domain", uuid))?;
        Ok(domain.agent_responses.get(&name).cloned())
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    async fn list_snapshot_names(&self, uuid: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let domain = state
            .domains
            .get(uuid)
            .ok_or_else(|| not_found("domain", uuid))?;
        Ok(domain.snapshots.iter().map(|(n, _)| n.clone()).collect())
    }

    async fn snapshot_xml(&self, uuid: &str, name: &str) -> Result<String> {
        let state = self.state.read().await;
        let domain = state
            .domains
            .get(uuid)
            .ok_or_else(|| not_found("domain", uuid))?;
        domain
            .snapshots
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, xml)| xml.clone())
            .ok_or_else(|| not_found("snapshot", name))
    }

    async fn define_snapshot(&self, uuid: &str, snapshot_xml: &str) -> Result<String> {
        let meta = snapshots::parse_snapshot_meta(snapshot_xml)?;
        let mut state = self.state.write().await;
        let domain = state
            .domains
            .get_mut(uuid)
            .ok_or_else(|| not_found("domain", uuid))?;
        if domain.snapshots.iter().any(|(n, _)| *n == meta.name) {
            return Err(HypervisorError::Conflict(format!(
                "snapshot already exists: {}",
                meta.name
            )));
        }

        let stored = format!(
            "<domainsnapshot>\n  <name>{}</name>\n  <description>{}</description>\n  \
             <state>{}</state>\n  <creationTime>{}</creationTime>\n  <domain>\n    <name>{}</name>\n  \
             </domain>\n</domainsnapshot>\n",
            meta.name,
            meta.description,
            domain.state.as_str(),
            chrono::Utc::now().timestamp(),
            domain.name,
        );
        domain.snapshots.push((meta.name, stored.clone()));
        Ok(stored)
    }

    async fn delete_snapshot(&self, uuid: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let domain = state
            .domains
            .get_mut(uuid)
            .ok_or_else(|| not_found("domain", uuid))?;
        let before = domain.snapshots.len();
        domain.snapshots.retain(|(n, _)| n != name);
        if domain.snapshots.len() == before {
            return Err(not_found("snapshot", name));
        }
        Ok(())
    }

    async fn revert_snapshot(&self, uuid: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let domain = state
            .domains
            .get_mut(uuid)
            .ok_or_else(|| not_found("domain", uuid))?;
        let meta_xml = domain
            .snapshots
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, xml)| xml.clone())
            .ok_or_else(|| not_found("snapshot", name))?;

        let meta = snapshots::parse_snapshot_meta(&meta_xml)?;
        domain.state = match meta.state.as_str() {
            "running" => DomainState::Running,
            "paused" => DomainState::Paused,
            _ => DomainState::Shutoff,
        };
        Ok(())
    }

    // =========================================================================
    // Storage
    // =========================================================================

    async fn list_pools(&self) -> Result<Vec<PoolRuntime>> {
        let state = self.state.read().await;
        let mut pools: Vec<PoolRuntime> = state
            .pools
            .values()
            .map(|p| PoolRuntime {
                name: p.name.clone(),
                state: p.state,
                capacity_b: p.capacity_b,
                allocation_b: p.allocation_b,
                path: p.path.to_string_lossy().to_string(),
            })
            .collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pools)
    }

    async fn list_volumes(&self, pool: &str) -> Result<Vec<VolumeRuntime>> {
        let state = self.state.read().await;
        let pool = state.pools.get(pool).ok_or_else(|| not_found("pool", pool))?;
        let mut volumes: Vec<VolumeRuntime> =
            pool.volumes.values().map(|v| v.record.clone()).collect();
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    async fn create_volume(
        &self,
        pool: &str,
        name: &str,
        capacity_gb: u64,
        format: &str,
    ) -> Result<VolumeRuntime> {
        let mut state = self.state.write().await;
        let pool = state
            .pools
            .get_mut(pool)
            .ok_or_else(|| not_found("pool", pool))?;
        if pool.volumes.contains_key(name) {
            return Err(HypervisorError::Conflict(format!(
                "volume already exists: {name}"
            )));
        }

        let path = pool.path.join(name);
        std::fs::write(&path, b"")
            .map_err(|e| HypervisorError::Io(format!("failed to create volume: {e}")))?;

        let record = VolumeRuntime {
            name: name.to_string(),
            pool: pool.name.clone(),
            path: path.to_string_lossy().to_string(),
            capacity_b: capacity_gb * 1024 * 1024 * 1024,
            format: format.to_string(),
        };
        pool.allocation_b += 1024 * 1024;
        pool.volumes
            .insert(name.to_string(), MockVolume { record: record.clone() });
        Ok(record)
    }

    async fn delete_volume(&self, pool: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let pool = state
            .pools
            .get_mut(pool)
            .ok_or_else(|| not_found("pool", pool))?;
        let volume = pool
            .volumes
            .remove(name)
            .ok_or_else(|| not_found("volume", name))?;
        let _ = std::fs::remove_file(&volume.record.path);
        Ok(())
    }

    async fn materialize_overlay(
        &self,
        pool: &str,
        volume: &str,
        backing: &Path,
        _backing_format: &str,
    ) -> Result<()> {
        let state = self.state.read().await;
        let pool = state.pools.get(pool).ok_or_else(|| not_found("pool", pool))?;
        let volume = pool
            .volumes
            .get(volume)
            .ok_or_else(|| not_found("volume", volume))?;
        // Record the backing relationship in the file body for assertions
        std::fs::write(
            &volume.record.path,
            format!("overlay-of:{}", backing.display()),
        )
        .map_err(|e| HypervisorError::Io(format!("failed to materialize overlay: {e}")))?;
        Ok(())
    }

    async fn resize_volume(&self, pool: &str, volume: &str, new_gb: u64) -> Result<()> {
        let mut state = self.state.write().await;
        let pool = state
            .pools
            .get_mut(pool)
            .ok_or_else(|| not_found("pool", pool))?;
        let volume = pool
            .volumes
            .get_mut(volume)
            .ok_or_else(|| not_found("volume", volume))?;
        volume.record.capacity_b = new_gb * 1024 * 1024 * 1024;
        Ok(())
    }

    async fn image_virtual_size_b(&self, path: &Path) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state.image_sizes.get(path).copied().unwrap_or(0))
    }

    // =========================================================================
    // Networks
    // =========================================================================

    async fn list_networks(&self) -> Result<Vec<NetworkRuntime>> {
        let state = self.state.read().await;
        let mut networks: Vec<NetworkRuntime> =
            state.networks.values().map(|n| n.record.clone()).collect();
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(networks)
    }

    async fn network_xml(&self, name: &str) -> Result<String> {
        let state = self.state.read().await;
        state
            .networks
            .get(name)
            .map(|n| n.xml.clone())
            .ok_or_else(|| not_found("network", name))
    }

    async fn define_network(&self, xml: &str) -> Result<()> {
        let (name, _) = domain_xml::parse_identity(xml)?;
        let mut state = self.state.write().await;
        if state.networks.contains_key(&name) {
            return Err(HypervisorError::Conflict(format!(
                "network already exists: {name}"
            )));
        }
        let bridge = xml
            .split("bridge name='")
            .nth(1)
            .and_then(|rest| rest.split('\'').next())
            .unwrap_or("virbr1")
            .to_string();
        state.networks.insert(
            name.clone(),
            MockNetwork {
                record: NetworkRuntime {
                    name,
                    uuid: Uuid::new_v4().to_string(),
                    bridge,
                    active: false,
                    persistent: true,
                },
                xml: xml.to_string(),
                autostart: false,
            },
        );
        Ok(())
    }

    async fn network_set_active(&self, name: &str, active: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let network = state
            .networks
            .get_mut(name)
            .ok_or_else(|| not_found("network", name))?;
        network.record.active = active;
        Ok(())
    }

    async fn network_set_autostart(&self, name: &str, autostart: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let network = state
            .networks
            .get_mut(name)
            .ok_or_else(|| not_found("network", name))?;
        network.autostart = autostart;
        Ok(())
    }

    async fn undefine_network(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let network = state
            .networks
            .get(name)
            .ok_or_else(|| not_found("network", name))?;
        if network.record.active {
            return Err(HypervisorError::Conflict(format!(
                "network is still active: {name}"
            )));
        }
        state.networks.remove(name);
        Ok(())
    }

    // =========================================================================
    // Console
    // =========================================================================

    async fn open_console(&self, uuid: &str) -> Result<ConsoleChannel> {
        {
            let state = self.state.read().await;
            let domain = state
                .domains
                .get(uuid)
                .ok_or_else(|| not_found("domain", uuid))?;
            if domain.state != DomainState::Running {
                return Err(HypervisorError::Precondition(
                    "console requires a running domain".to_string(),
                ));
            }
        }

        let (channel, mut endpoints) = channel_pair();
        tokio::spawn(async move {
            let _ = endpoints
                .to_external
                .send(Bytes::from_static(b"\r\nflint-mock login: "))
                .await;
            while let Some(data) = endpoints.from_external.recv().await {
                if endpoints.to_external.send(data).await.is_err() {
                    break;
                }
            }
        });
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_xml::{DiskDevice, DiskSource, DomainDescriptor};

    async fn define_test_domain(mock: &MockHypervisor, name: &str) -> String {
        let xml = DomainDescriptor::new(name, 2048, 2)
            .with_disk(DiskDevice::primary(
                DiskSource::File(format!("/tmp/{name}.qcow2")),
                "qcow2",
            ))
            .build();
        mock.define_domain(&xml).await.unwrap()
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let mock = MockHypervisor::new();
        let uuid = define_test_domain(&mock, "vm-a").await;

        assert_eq!(
            mock.domain_runtime(&uuid).await.unwrap().state,
            DomainState::Shutoff
        );
        mock.domain_action(&uuid, LifecycleAction::Start).await.unwrap();
        assert_eq!(
            mock.domain_runtime(&uuid).await.unwrap().state,
            DomainState::Running
        );
        assert!(mock.domain_action(&uuid, LifecycleAction::Start).await.is_err());
        mock.domain_action(&uuid, LifecycleAction::Pause).await.unwrap();
        mock.domain_action(&uuid, LifecycleAction::Resume).await.unwrap();
        mock.domain_action(&uuid, LifecycleAction::ForceStop).await.unwrap();
        assert_eq!(
            mock.domain_runtime(&uuid).await.unwrap().state,
            DomainState::Shutoff
        );
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let mock = MockHypervisor::new();
        define_test_domain(&mock, "vm-a").await;
        let xml = DomainDescriptor::new("vm-a", 1024, 1).build();
        assert!(matches!(
            mock.define_domain(&xml).await,
            Err(HypervisorError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn running_domains_accrue_cpu_time() {
        let mock = MockHypervisor::new();
        let uuid = define_test_domain(&mock, "vm-a").await;
        mock.domain_action(&uuid, LifecycleAction::Start).await.unwrap();
        let first = mock.domain_runtime(&uuid).await.unwrap().cpu_time_ns;
        let second = mock.domain_runtime(&uuid).await.unwrap().cpu_time_ns;
        assert!(second > first);
    }

    #[tokio::test]
    async fn hot_plug_requires_running() {
        let mock = MockHypervisor::new();
        let uuid = define_test_domain(&mock, "vm-a").await;
        let err = mock.attach_device(&uuid, "<disk/>").await.unwrap_err();
        assert!(matches!(err, HypervisorError::Conflict(_)));
    }

    #[tokio::test]
    async fn snapshot_crud_and_revert() {
        let mock = MockHypervisor::new();
        let uuid = define_test_domain(&mock, "vm-a").await;
        mock.domain_action(&uuid, LifecycleAction::Start).await.unwrap();

        let xml = snapshots::snapshot_definition_xml("baseline", "first");
        mock.define_snapshot(&uuid, &xml).await.unwrap();
        assert_eq!(
            mock.list_snapshot_names(&uuid).await.unwrap(),
            vec!["baseline".to_string()]
        );

        mock.domain_action(&uuid, LifecycleAction::ForceStop).await.unwrap();
        mock.revert_snapshot(&uuid, "baseline").await.unwrap();
        assert_eq!(
            mock.domain_runtime(&uuid).await.unwrap().state,
            DomainState::Running
        );

        mock.delete_snapshot(&uuid, "baseline").await.unwrap();
        assert!(mock.list_snapshot_names(&uuid).await.unwrap().is_empty());
        assert!(mock.revert_snapshot(&uuid, "baseline").await.is_err());
    }

    #[tokio::test]
    async fn volume_files_exist_on_disk() {
        let mock = MockHypervisor::new();
        let volume = mock
            .create_volume("default", "test.qcow2", 10, "qcow2")
            .await
            .unwrap();
        assert!(Path::new(&volume.path).exists());

        mock.delete_volume("default", "test.qcow2").await.unwrap();
        assert!(!Path::new(&volume.path).exists());
    }

    #[tokio::test]
    async fn console_echoes() {
        let mock = MockHypervisor::new();
        let uuid = define_test_domain(&mock, "vm-a").await;
        mock.domain_action(&uuid, LifecycleAction::Start).await.unwrap();

        let mut channel = mock.open_console(&uuid).await.unwrap();
        let banner = channel.output.recv().await.unwrap();
        assert!(!banner.is_empty());

        channel.input.send(Bytes::from_static(b"root\n")).await.unwrap();
        let echoed = channel.output.recv().await.unwrap();
        assert_eq!(&echoed[..], b"root\n");
    }

    #[tokio::test]
    async fn console_requires_running_domain() {
        let mock = MockHypervisor::new();
        let uuid = define_test_domain(&mock, "vm-a").await;
        assert!(matches!(
            mock.open_console(&uuid).await,
            Err(HypervisorError::Precondition(_))
        ));
    }
}
