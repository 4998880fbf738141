//! Libvirt backend.
//!
//! One `Connect` is opened at construction and owned for the process
//! lifetime. Every libvirt object handle (domain, pool, volume, network,
//! snapshot, stream) is looked up, used and dropped inside a single method;
//! the long-lived console stream is the only exception and is released when
//! either pump thread exits. Mutating verbs are serialized behind an internal
//! mutex; read-only queries go to libvirt concurrently.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use quick_xml::events::Event;
use quick_xml::Reader;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::domain_snapshot::DomainSnapshot;
use virt::network::Network;
use virt::storage_pool::StoragePool;
use virt::storage_vol::StorageVol;
use virt::stream::Stream;
use virt::sys;

use crate::console::{channel_pair, ConsoleChannel, CONSOLE_CHUNK};
use crate::disk::DiskTool;
use crate::error::{HypervisorError, Result};
use crate::traits::Hypervisor;
use crate::types::*;

/// Libvirt/QEMU backend.
pub struct LibvirtHypervisor {
    conn: Connect,
    write_lock: Mutex<()>,
    disk_tool: DiskTool,
}

impl LibvirtHypervisor {
    /// Connect to the hypervisor at the given URI.
    ///
    /// Common URIs: `qemu:///system`, `qemu:///session`,
    /// `qemu+ssh://user@host/system`.
    pub fn new(uri: &str) -> Result<Self> {
        info!(uri = %uri, "Connecting to libvirt");
        let conn = Connect::open(Some(uri))
            .map_err(|e| HypervisorError::Hypervisor(format!("connection failed: {e}")))?;
        info!("Connected to libvirt");
        Ok(Self {
            conn,
            write_lock: Mutex::new(()),
            disk_tool: DiskTool::new(),
        })
    }

    fn get_domain(&self, uuid: &str) -> Result<Domain> {
        Domain::lookup_by_uuid_string(&self.conn, uuid)
            .map_err(|_| HypervisorError::NotFound(format!("domain not found: {uuid}")))
    }

    fn get_pool(&self, name: &str) -> Result<StoragePool> {
        StoragePool::lookup_by_name(&self.conn, name)
            .map_err(|_| HypervisorError::NotFound(format!("pool not found: {name}")))
    }

    fn get_network(&self, name: &str) -> Result<Network> {
        Network::lookup_by_name(&self.conn, name)
            .map_err(|_| HypervisorError::NotFound(format!("network not found: {name}")))
    }

    fn state_from_libvirt(state: sys::virDomainState) -> DomainState {
        match state {
            sys::VIR_DOMAIN_RUNNING => DomainState::Running,
            sys::VIR_DOMAIN_BLOCKED => DomainState::Blocked,
            sys::VIR_DOMAIN_PAUSED => DomainState::Paused,
            sys::VIR_DOMAIN_SHUTDOWN => DomainState::Shutdown,
            sys::VIR_DOMAIN_SHUTOFF => DomainState::Shutoff,
            sys::VIR_DOMAIN_CRASHED => DomainState::Crashed,
            sys::VIR_DOMAIN_PMSUSPENDED => DomainState::Suspended,
            _ => DomainState::NoState,
        }
    }

    fn pool_state_from_libvirt(state: u32) -> PoolState {
        match state {
            sys::VIR_STORAGE_POOL_INACTIVE => PoolState::Inactive,
            sys::VIR_STORAGE_POOL_BUILDING => PoolState::Building,
            sys::VIR_STORAGE_POOL_RUNNING => PoolState::Active,
            sys::VIR_STORAGE_POOL_DEGRADED => PoolState::Degraded,
            sys::VIR_STORAGE_POOL_INACCESSIBLE => PoolState::Inaccessible,
            _ => PoolState::Unknown,
        }
    }

    fn runtime_from(&self, domain: &Domain) -> Result<DomainRuntime> {
        let uuid = domain
            .get_uuid_string()
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;
        let name = domain
            .get_name()
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;
        let (state, _) = domain
            .get_state()
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;
        let domain_info = domain
            .get_info()
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;

        Ok(DomainRuntime {
            uuid,
            name,
            state: Self::state_from_libvirt(state),
            memory_kb: domain_info.memory,
            max_memory_kb: domain_info.max_mem,
            vcpus: domain_info.nr_virt_cpu,
            cpu_time_ns: domain_info.cpu_time,
        })
    }

    fn volume_record(&self, pool_name: &str, vol: &StorageVol) -> Result<VolumeRuntime> {
        let name = vol
            .get_name()
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;
        let path = vol
            .get_path()
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;
        let vol_info = vol
            .get_info()
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;
        let format = vol
            .get_xml_desc(0)
            .ok()
            .and_then(|xml| parse_target_format(&xml))
            .unwrap_or_else(|| "raw".to_string());

        Ok(VolumeRuntime {
            name,
            pool: pool_name.to_string(),
            path,
            capacity_b: vol_info.capacity,
            format,
        })
    }

    fn volume_path(&self, pool: &str, volume: &str) -> Result<String> {
        let pool = self.get_pool(pool)?;
        let vol = StorageVol::lookup_by_name(&pool, volume)
            .map_err(|_| HypervisorError::NotFound(format!("volume not found: {volume}")))?;
        vol.get_path()
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))
    }
}

#[async_trait]
impl Hypervisor for LibvirtHypervisor {
    async fn ping(&self) -> Result<bool> {
        Ok(self.conn.is_alive().unwrap_or(false))
    }

    async fn node_resources(&self) -> Result<NodeResources> {
        let node = self
            .conn
            .get_node_info()
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;
        let free_b = self.conn.get_free_memory().unwrap_or(0);

        Ok(NodeResources {
            cpu_cores: node.cpus,
            total_memory_kb: node.memory,
            free_memory_kb: free_b / 1024,
        })
    }

    #[instrument(skip(self))]
    async fn list_domains(&self) -> Result<Vec<DomainRuntime>> {
        let flags =
            sys::VIR_CONNECT_LIST_DOMAINS_ACTIVE | sys::VIR_CONNECT_LIST_DOMAINS_INACTIVE;
        let domains = self
            .conn
            .list_all_domains(flags)
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;

        let mut runtimes = Vec::with_capacity(domains.len());
        for domain in domains {
            runtimes.push(self.runtime_from(&domain)?);
        }
        debug!(count = runtimes.len(), "Listed domains");
        Ok(runtimes)
    }

    async fn domain_runtime(&self, uuid: &str) -> Result<DomainRuntime> {
        let domain = self.get_domain(uuid)?;
        self.runtime_from(&domain)
    }

    async fn domain_xml(&self, uuid: &str) -> Result<String> {
        let domain = self.get_domain(uuid)?;
        domain
            .get_xml_desc(0)
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))
    }

    #[instrument(skip(self, xml))]
    async fn define_domain(&self, xml: &str) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let domain = Domain::define_xml(&self.conn, xml)
            .map_err(|e| HypervisorError::Hypervisor(format!("define failed: {e}")))?;
        domain
            .get_uuid_string()
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))
    }

    async fn redefine_domain(&self, xml: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        Domain::define_xml(&self.conn, xml)
            .map(|_| ())
            .map_err(|e| HypervisorError::Integrity(format!("redefine failed: {e}")))
    }

    #[instrument(skip(self))]
    async fn undefine_domain(&self, uuid: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let domain = self.get_domain(uuid)?;
        domain
            .undefine()
            .map_err(|e| HypervisorError::Hypervisor(format!("undefine failed: {e}")))
    }

    #[instrument(skip(self))]
    async fn domain_action(&self, uuid: &str, action: LifecycleAction) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let domain = self.get_domain(uuid)?;

        let result = match action {
            LifecycleAction::Start => domain.create().map(|_| ()),
            LifecycleAction::Stop => domain.shutdown(),
            LifecycleAction::Reboot => domain.reboot(sys::VIR_DOMAIN_REBOOT_DEFAULT),
            LifecycleAction::ForceStop => domain.destroy(),
            LifecycleAction::Pause => domain.suspend(),
            LifecycleAction::Resume => domain.resume(),
        };

        result.map_err(|e| {
            HypervisorError::Precondition(format!("{} failed: {e}", action.as_str()))
        })?;
        info!(action = action.as_str(), "Domain action applied");
        Ok(())
    }

    #[instrument(skip(self, device_xml))]
    async fn attach_device(&self, uuid: &str, device_xml: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let domain = self.get_domain(uuid)?;
        domain
            .attach_device(device_xml)
            .map_err(|e| HypervisorError::Conflict(format!("hot-plug rejected: {e}")))
    }

    async fn performance_counters(&self, uuid: &str) -> Result<PerformanceSample> {
        let domain = self.get_domain(uuid)?;
        let domain_info = domain
            .get_info()
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;

        let (disk_read_b, disk_write_b) = domain
            .get_block_stats("vda")
            .map(|stats| {
                (
                    stats.rd_bytes.max(0) as u64,
                    stats.wr_bytes.max(0) as u64,
                )
            })
            .unwrap_or((0, 0));

        let (net_rx_b, net_tx_b) = domain
            .interface_stats("vnet0")
            .map(|stats| (stats.rx_bytes.max(0) as u64, stats.tx_bytes.max(0) as u64))
            .unwrap_or((0, 0));

        Ok(PerformanceSample {
            cpu_time_ns: domain_info.cpu_time,
            memory_rss_kb: domain_info.memory,
            disk_read_b,
            disk_write_b,
            net_rx_b,
            net_tx_b,
        })
    }

    async fn guest_agent_command(
        &self,
        uuid: &str,
        command_json: &str,
        timeout_secs: i32,
    ) -> Result<Option<String>> {
        let domain = self.get_domain(uuid)?;
        match domain.qemu_agent_command(command_json, timeout_secs, 0) {
            Ok(response) => Ok(Some(response)),
            // An unreachable or unresponsive agent is not an error
            Err(e) => {
                debug!(error = %e, "Guest agent unreachable");
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    async fn list_snapshot_names(&self, uuid: &str) -> Result<Vec<String>> {
        let domain = self.get_domain(uuid)?;
        let snapshots = domain
            .list_all_snapshots(0)
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;
        Ok(snapshots
            .iter()
            .filter_map(|s| s.get_name().ok())
            .collect())
    }

    async fn snapshot_xml(&self, uuid: &str, name: &str) -> Result<String> {
        let domain = self.get_domain(uuid)?;
        let snapshot = DomainSnapshot::lookup_by_name(&domain, name, 0)
            .map_err(|_| HypervisorError::NotFound(format!("snapshot not found: {name}")))?;
        snapshot
            .get_xml_desc(0)
            .map_err(|e| HypervisorError::Integrity(e.to_string()))
    }

    #[instrument(skip(self, snapshot_xml))]
    async fn define_snapshot(&self, uuid: &str, snapshot_xml: &str) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let domain = self.get_domain(uuid)?;
        let snapshot = DomainSnapshot::create_xml(&domain, snapshot_xml, 0)
            .map_err(|e| HypervisorError::Hypervisor(format!("snapshot create failed: {e}")))?;
        snapshot
            .get_xml_desc(0)
            .map_err(|e| HypervisorError::Integrity(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn delete_snapshot(&self, uuid: &str, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let domain = self.get_domain(uuid)?;
        let snapshot = DomainSnapshot::lookup_by_name(&domain, name, 0)
            .map_err(|_| HypervisorError::NotFound(format!("snapshot not found: {name}")))?;
        snapshot
            .delete(0)
            .map_err(|e| HypervisorError::Hypervisor(format!("snapshot delete failed: {e}")))
    }

    #[instrument(skip(self))]
    async fn revert_snapshot(&self, uuid: &str, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let domain = self.get_domain(uuid)?;
        let snapshot = DomainSnapshot::lookup_by_name(&domain, name, 0)
            .map_err(|_| HypervisorError::NotFound(format!("snapshot not found: {name}")))?;
        snapshot
            .revert(0)
            .map_err(|e| HypervisorError::Precondition(format!("revert failed: {e}")))
    }

    // =========================================================================
    // Storage
    // =========================================================================

    async fn list_pools(&self) -> Result<Vec<PoolRuntime>> {
        let pools = self
            .conn
            .list_all_storage_pools(0)
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;

        let mut records = Vec::with_capacity(pools.len());
        for pool in pools {
            let name = pool
                .get_name()
                .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;
            let pool_info = pool
                .get_info()
                .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;
            let path = pool
                .get_xml_desc(0)
                .ok()
                .and_then(|xml| parse_target_path(&xml))
                .unwrap_or_default();

            records.push(PoolRuntime {
                name,
                state: Self::pool_state_from_libvirt(pool_info.state),
                capacity_b: pool_info.capacity,
                allocation_b: pool_info.allocation,
                path,
            });
        }
        Ok(records)
    }

    async fn list_volumes(&self, pool: &str) -> Result<Vec<VolumeRuntime>> {
        let pool_handle = self.get_pool(pool)?;
        let volumes = pool_handle
            .list_all_volumes(0)
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;

        let mut records = Vec::with_capacity(volumes.len());
        for vol in volumes {
            records.push(self.volume_record(pool, &vol)?);
        }
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn create_volume(
        &self,
        pool: &str,
        name: &str,
        capacity_gb: u64,
        format: &str,
    ) -> Result<VolumeRuntime> {
        let _guard = self.write_lock.lock().await;
        let pool_handle = self.get_pool(pool)?;

        let vol_xml = format!(
            "<volume>\n  <name>{name}</name>\n  <capacity unit='G'>{capacity_gb}</capacity>\n  \
             <target>\n    <format type='{format}'/>\n  </target>\n</volume>\n"
        );
        let vol = StorageVol::create_xml(&pool_handle, &vol_xml, 0)
            .map_err(|e| HypervisorError::Conflict(format!("volume create failed: {e}")))?;
        self.volume_record(pool, &vol)
    }

    #[instrument(skip(self))]
    async fn delete_volume(&self, pool: &str, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let pool_handle = self.get_pool(pool)?;
        let vol = StorageVol::lookup_by_name(&pool_handle, name)
            .map_err(|_| HypervisorError::NotFound(format!("volume not found: {name}")))?;
        vol.delete(0)
            .map_err(|e| HypervisorError::Hypervisor(format!("volume delete failed: {e}")))
    }

    async fn materialize_overlay(
        &self,
        pool: &str,
        volume: &str,
        backing: &Path,
        backing_format: &str,
    ) -> Result<()> {
        let path = self.volume_path(pool, volume)?;
        // qemu-img refuses to clobber, so drop the empty volume body first
        std::fs::remove_file(&path)
            .map_err(|e| HypervisorError::Io(format!("failed to reset volume body: {e}")))?;
        self.disk_tool
            .create_overlay(Path::new(&path), backing, backing_format)?;
        if let Ok(pool_handle) = self.get_pool(pool) {
            let _ = pool_handle.refresh(0);
        }
        Ok(())
    }

    async fn resize_volume(&self, pool: &str, volume: &str, new_gb: u64) -> Result<()> {
        let path = self.volume_path(pool, volume)?;
        self.disk_tool.resize(Path::new(&path), new_gb)?;
        if let Ok(pool_handle) = self.get_pool(pool) {
            let _ = pool_handle.refresh(0);
        }
        Ok(())
    }

    async fn image_virtual_size_b(&self, path: &Path) -> Result<u64> {
        Ok(self.disk_tool.info(path)?.virtual_size_b)
    }

    // =========================================================================
    // Networks
    // =========================================================================

    async fn list_networks(&self) -> Result<Vec<NetworkRuntime>> {
        let networks = self
            .conn
            .list_all_networks(0)
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;

        let mut records = Vec::with_capacity(networks.len());
        for network in networks {
            records.push(NetworkRuntime {
                name: network
                    .get_name()
                    .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?,
                uuid: network.get_uuid_string().unwrap_or_default(),
                bridge: network.get_bridge_name().unwrap_or_default(),
                active: network.is_active().unwrap_or(false),
                persistent: network.is_persistent().unwrap_or(false),
            });
        }
        Ok(records)
    }

    async fn network_xml(&self, name: &str) -> Result<String> {
        let network = self.get_network(name)?;
        network
            .get_xml_desc(0)
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))
    }

    #[instrument(skip(self, xml))]
    async fn define_network(&self, xml: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        Network::define_xml(&self.conn, xml)
            .map(|_| ())
            .map_err(|e| HypervisorError::Hypervisor(format!("network define failed: {e}")))
    }

    #[instrument(skip(self))]
    async fn network_set_active(&self, name: &str, active: bool) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let network = self.get_network(name)?;
        let is_active = network.is_active().unwrap_or(false);

        if active && !is_active {
            network
                .create()
                .map_err(|e| HypervisorError::Hypervisor(format!("network start failed: {e}")))?;
        } else if !active && is_active {
            network
                .destroy()
                .map_err(|e| HypervisorError::Hypervisor(format!("network stop failed: {e}")))?;
        }
        Ok(())
    }

    async fn network_set_autostart(&self, name: &str, autostart: bool) -> Result<()> {
        let network = self.get_network(name)?;
        network
            .set_autostart(autostart)
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn undefine_network(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let network = self.get_network(name)?;
        network
            .undefine()
            .map_err(|e| HypervisorError::Hypervisor(format!("network undefine failed: {e}")))
    }

    // =========================================================================
    // Console
    // =========================================================================

    async fn open_console(&self, uuid: &str) -> Result<ConsoleChannel> {
        let domain = self.get_domain(uuid)?;
        let stream = Stream::new(&self.conn, 0)
            .map_err(|e| HypervisorError::Hypervisor(e.to_string()))?;
        domain
            .open_console(None, &stream, 0)
            .map_err(|e| HypervisorError::Precondition(format!("console open failed: {e}")))?;

        let (channel, endpoints) = channel_pair();
        let stream = Arc::new(stream);
        let to_external = endpoints.to_external;
        let mut from_external = endpoints.from_external;

        // Console → external. Owns the domain handle for the session lifetime.
        let read_stream = Arc::clone(&stream);
        std::thread::spawn(move || {
            let _session_domain = domain;
            let mut buf = [0u8; CONSOLE_CHUNK];
            loop {
                match read_stream.recv(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if to_external
                            .blocking_send(Bytes::copy_from_slice(&buf[..n]))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Console stream read failed");
                        break;
                    }
                }
            }
            let _ = read_stream.abort();
        });

        // External → console. Closing the external side aborts the stream,
        // which unblocks the reader above.
        let write_stream = stream;
        std::thread::spawn(move || {
            while let Some(data) = from_external.blocking_recv() {
                let mut offset = 0;
                while offset < data.len() {
                    match write_stream.send(&data[offset..]) {
                        Ok(0) => return,
                        Ok(n) => offset += n,
                        Err(e) => {
                            warn!(error = %e, "Console stream write failed");
                            let _ = write_stream.abort();
                            return;
                        }
                    }
                }
            }
            let _ = write_stream.finish();
        });

        Ok(channel)
    }
}

/// Text of `<target><path>` in a pool description.
fn parse_target_path(xml: &str) -> Option<String> {
    parse_target_child_text(xml, b"path")
}

/// `type` attribute of `<target><format>` in a volume description.
fn parse_target_format(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut in_target = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"target" => in_target = true,
            Ok(Event::End(e)) if e.name().as_ref() == b"target" => in_target = false,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if in_target && e.name().as_ref() == b"format" {
                    return e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"type")
                        .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

fn parse_target_child_text(xml: &str, child: &[u8]) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut in_target = false;
    let mut capture = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.name().as_ref() == b"target" {
                    in_target = true;
                } else {
                    capture = in_target && e.name().as_ref() == child;
                }
            }
            Ok(Event::Text(t)) if capture => {
                return t.unescape().ok().map(|s| s.trim().to_string());
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"target" {
                    in_target = false;
                }
                capture = false;
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_target_path_parses() {
        let xml = r#"<pool type='dir'>
  <name>default</name>
  <target>
    <path>/var/lib/libvirt/images</path>
    <permissions><mode>0711</mode></permissions>
  </target>
</pool>"#;
        assert_eq!(
            parse_target_path(xml).as_deref(),
            Some("/var/lib/libvirt/images")
        );
        assert_eq!(parse_target_path("<pool/>"), None);
    }

    #[test]
    fn volume_target_format_parses() {
        let xml = r#"<volume>
  <name>web-01-disk-0.qcow2</name>
  <target>
    <path>/var/lib/libvirt/images/web-01-disk-0.qcow2</path>
    <format type='qcow2'/>
  </target>
</volume>"#;
        assert_eq!(parse_target_format(xml).as_deref(), Some("qcow2"));
        assert_eq!(parse_target_format("<volume/>"), None);
    }
}
