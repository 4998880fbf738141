//! High-level hypervisor client.
//!
//! `HypervisorClient` is the single entry point the API layer talks to. It
//! owns the backend session, the image library and the activity sink, and
//! composes the sampler, composer, snapshot, network and resource helpers
//! into the public operation set.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::cloudinit::SeedGenerator;
use crate::composer::DomainComposer;
use crate::console::ConsoleChannel;
use crate::domain_xml::{
    count_interfaces, disk_element, insert_before_devices_close, nic_element, parse_devices,
    used_disk_targets, DiskDevice, DiskSource, NicDevice,
};
use crate::error::{HypervisorError, Result};
use crate::events::{ActivitySink, ActivityStatus, NoopSink};
use crate::guest_agent;
use crate::images::ImageLibrary;
use crate::network::{
    allocate_third_octet, network_definition_xml, subnet_octets, RESERVED_NETWORK,
};
use crate::resources::{aggregate_storage, compose_health, probe_filesystem, PoolUsage};
use crate::sampler::{self, DEFAULT_SAMPLE_WINDOW};
use crate::snapshots::{parse_snapshot_meta, snapshot_definition_xml};
use crate::traits::Hypervisor;
use crate::types::*;

/// Bounded wait for a graceful shutdown before force-destroying.
const DELETE_GRACE: Duration = Duration::from_secs(2);
/// Poll interval while waiting for a graceful shutdown.
const DELETE_POLL: Duration = Duration::from_millis(250);

/// High-level control client over one hypervisor session.
pub struct HypervisorClient {
    hypervisor: Arc<dyn Hypervisor>,
    library: Arc<ImageLibrary>,
    seeds: SeedGenerator,
    sink: Arc<dyn ActivitySink>,
    sample_window: Duration,
}

impl HypervisorClient {
    pub fn new(hypervisor: Arc<dyn Hypervisor>, library: Arc<ImageLibrary>) -> Self {
        Self {
            hypervisor,
            library,
            seeds: SeedGenerator::new(),
            sink: Arc::new(NoopSink),
            sample_window: DEFAULT_SAMPLE_WINDOW,
        }
    }

    /// Attach an activity sink.
    pub fn with_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Override the sampler window.
    pub fn with_sample_window(mut self, window: Duration) -> Self {
        self.sample_window = window;
        self
    }

    fn record(&self, action: &str, target: &str, status: ActivityStatus, message: &str) {
        self.sink.record(action, target, status, message);
    }

    // =========================================================================
    // Host
    // =========================================================================

    pub async fn ping(&self) -> Result<bool> {
        self.hypervisor.ping().await
    }

    /// Aggregated host capacity with pool storage deduplicated by filesystem.
    pub async fn host_resources(&self) -> Result<HostResources> {
        let node = self.hypervisor.node_resources().await?;
        let pools = self.hypervisor.list_pools().await?;

        let usage: Vec<PoolUsage> = pools
            .iter()
            .map(|pool| PoolUsage {
                allocation_b: pool.allocation_b,
                filesystem: probe_filesystem(Path::new(&pool.path)),
            })
            .collect();
        let (storage_total_b, storage_used_b) = aggregate_storage(&usage);

        let domains = self.hypervisor.list_domains().await?;
        let mut active_interfaces = 0u32;
        for domain in domains.iter().filter(|d| d.state.is_active()) {
            if let Ok(xml) = self.hypervisor.domain_xml(&domain.uuid).await {
                active_interfaces += count_interfaces(&xml) as u32;
            }
        }

        Ok(HostResources {
            cpu_cores: node.cpu_cores,
            total_memory_kb: node.total_memory_kb,
            free_memory_kb: node.free_memory_kb,
            storage_total_b,
            storage_used_b,
            active_interfaces,
        })
    }

    /// Composed host health report.
    pub async fn host_status(&self) -> Result<HostHealth> {
        let domains = self.hypervisor.list_domains().await?;
        let pools = self.hypervisor.list_pools().await?;
        let usage: Vec<PoolUsage> = pools
            .iter()
            .map(|pool| PoolUsage {
                allocation_b: pool.allocation_b,
                filesystem: probe_filesystem(Path::new(&pool.path)),
            })
            .collect();
        let (total, used) = aggregate_storage(&usage);
        Ok(compose_health(&domains, &pools, total, used))
    }

    // =========================================================================
    // Domains
    // =========================================================================

    /// Sampled summaries of all domains.
    pub async fn list_domain_summaries(&self) -> Result<Vec<DomainSummary>> {
        sampler::sample_summaries(self.hypervisor.as_ref(), self.sample_window).await
    }

    /// Full details of one domain, including the raw description.
    #[instrument(skip(self))]
    pub async fn get_domain_details(&self, uuid: &str) -> Result<DomainDetails> {
        validate_uuid(uuid)?;
        let runtime = self.hypervisor.domain_runtime(uuid).await?;
        let xml = self.hypervisor.domain_xml(uuid).await?;
        let (disks, nics) = parse_devices(&xml)?;
        let (os_hint, ip_addresses) =
            sampler::guest_identity(self.hypervisor.as_ref(), &runtime).await;

        Ok(DomainDetails {
            uuid: runtime.uuid,
            name: runtime.name,
            state: runtime.state,
            memory_kb: runtime.memory_kb,
            max_memory_kb: runtime.max_memory_kb,
            vcpus: runtime.vcpus,
            os_hint,
            ip_addresses,
            disks,
            nics,
            xml,
        })
    }

    /// Create a domain through the composer and return its details.
    #[instrument(skip(self, spec), fields(vm_name = %spec.name))]
    pub async fn create_domain(&self, spec: &VmCreateSpec) -> Result<DomainDetails> {
        let composer = DomainComposer::new(self.hypervisor.as_ref(), &self.library, &self.seeds);
        let outcome = composer.create(spec).await?;

        self.record(
            "vm.create",
            &spec.name,
            ActivityStatus::Success,
            &format!("domain {} created", spec.name),
        );
        for warning in &outcome.warnings {
            self.record("vm.create", &spec.name, ActivityStatus::Warning, warning);
        }

        self.get_domain_details(&outcome.uuid).await
    }

    /// Create by reverting a source domain to its most recent snapshot.
    ///
    /// "Most recent" is decided by the parsed creation timestamps; the
    /// hypervisor's snapshot listing carries no ordering guarantee.
    #[instrument(skip(self))]
    pub async fn create_from_template(&self, source_uuid: &str) -> Result<DomainDetails> {
        validate_uuid(source_uuid)?;
        let snapshots = self.list_snapshots(source_uuid).await?;
        let latest = latest_snapshot(snapshots).ok_or_else(|| {
            HypervisorError::Precondition("source domain has no snapshots".to_string())
        })?;

        self.hypervisor
            .revert_snapshot(source_uuid, &latest.name)
            .await?;
        self.record(
            "vm.from-template",
            source_uuid,
            ActivityStatus::Success,
            &format!("reverted to snapshot {}", latest.name),
        );
        self.get_domain_details(source_uuid).await
    }

    /// Apply a lifecycle verb.
    #[instrument(skip(self))]
    pub async fn domain_action(&self, uuid: &str, action: LifecycleAction) -> Result<()> {
        validate_uuid(uuid)?;
        self.hypervisor.domain_action(uuid, action).await?;
        self.record(
            &format!("vm.{}", action.as_str()),
            uuid,
            ActivityStatus::Success,
            &format!("domain action {} applied", action.as_str()),
        );
        Ok(())
    }

    /// Delete a domain, optionally cascading to its volumes.
    ///
    /// Running domains get a graceful shutdown attempt bounded by ~2s, then a
    /// force-destroy. With `cascade_disks`, only volumes inside a known pool
    /// root (or the image library) are removed; anything else is skipped with
    /// a warning.
    #[instrument(skip(self))]
    pub async fn delete_domain(&self, uuid: &str, cascade_disks: bool) -> Result<()> {
        validate_uuid(uuid)?;
        let runtime = self.hypervisor.domain_runtime(uuid).await?;

        if runtime.state.is_active() || runtime.state == DomainState::Paused {
            self.shutdown_with_grace(uuid).await?;
        }

        let xml = self.hypervisor.domain_xml(uuid).await?;
        self.hypervisor.undefine_domain(uuid).await?;

        if cascade_disks {
            let (disks, _) = parse_devices(&xml).unwrap_or_default();
            for disk in disks {
                self.cascade_delete_disk(&runtime.name, &disk).await;
            }
        }

        self.record(
            "vm.delete",
            &runtime.name,
            ActivityStatus::Success,
            &format!("domain {} deleted", runtime.name),
        );
        Ok(())
    }

    async fn shutdown_with_grace(&self, uuid: &str) -> Result<()> {
        debug!("Attempting graceful shutdown before delete");
        let _ = self
            .hypervisor
            .domain_action(uuid, LifecycleAction::Stop)
            .await;

        let deadline = tokio::time::Instant::now() + DELETE_GRACE;
        while tokio::time::Instant::now() < deadline {
            match self.hypervisor.domain_runtime(uuid).await {
                Ok(runtime) if runtime.state == DomainState::Shutoff => return Ok(()),
                Ok(_) => tokio::time::sleep(DELETE_POLL).await,
                Err(_) => return Ok(()),
            }
        }

        warn!("Graceful shutdown timed out, destroying");
        self.hypervisor
            .domain_action(uuid, LifecycleAction::ForceStop)
            .await
    }

    async fn cascade_delete_disk(&self, domain_name: &str, disk: &DiskInfo) {
        if disk.source.is_empty() {
            return;
        }

        // Volume-sourced disks carry their owning pool and are always managed
        if let Some(ref pool) = disk.pool {
            if let Err(e) = self.hypervisor.delete_volume(pool, &disk.source).await {
                warn!(pool = %pool, volume = %disk.source, error = %e, "Cascade volume delete failed");
            }
            return;
        }

        // Seed media and other managed files live under the library root
        let path = Path::new(&disk.source);
        if self.library.is_managed_path(path) {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %disk.source, error = %e, "Failed to remove managed file");
            }
            return;
        }

        let pools = match self.hypervisor.list_pools().await {
            Ok(pools) => pools,
            Err(e) => {
                warn!(error = %e, "Cannot enumerate pools for cascade delete");
                return;
            }
        };

        let owner = pools
            .iter()
            .find(|pool| !pool.path.is_empty() && path.starts_with(&pool.path));
        match owner {
            Some(pool) => {
                let volume = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if let Err(e) = self.hypervisor.delete_volume(&pool.name, &volume).await {
                    warn!(pool = %pool.name, volume = %volume, error = %e, "Cascade volume delete failed");
                }
            }
            None => {
                warn!(path = %disk.source, "Disk path outside known pool roots, skipping delete");
                self.record(
                    "vm.delete",
                    domain_name,
                    ActivityStatus::Warning,
                    &format!("skipped disk outside managed storage: {}", disk.source),
                );
            }
        }
    }

    /// One-shot performance counters.
    pub async fn get_performance(&self, uuid: &str) -> Result<PerformanceSample> {
        validate_uuid(uuid)?;
        self.hypervisor.performance_counters(uuid).await
    }

    /// Open the domain's serial console.
    pub async fn open_console(&self, uuid: &str) -> Result<ConsoleChannel> {
        validate_uuid(uuid)?;
        self.hypervisor.open_console(uuid).await
    }

    // =========================================================================
    // Device attachment
    // =========================================================================

    /// Attach a disk: hot-plug when running, cold-plug via redefine otherwise.
    #[instrument(skip(self, spec))]
    pub async fn attach_disk(&self, uuid: &str, spec: &AttachDiskSpec) -> Result<()> {
        validate_uuid(uuid)?;
        let source = self.resolve_disk_source(spec).await?;
        let xml = self.hypervisor.domain_xml(uuid).await?;
        let used = used_disk_targets(&xml)?;
        let target = next_virtio_target(&used)?;

        let device = DiskDevice {
            source,
            target,
            bus: "virtio".to_string(),
            device: DiskDeviceKind::Disk,
            format: spec.format.clone(),
            readonly: false,
        };
        let fragment = disk_element(&device);

        self.plug_device(uuid, &xml, &fragment).await?;
        self.record(
            "vm.attach-disk",
            uuid,
            ActivityStatus::Success,
            &format!("disk attached on {}", device.target),
        );
        Ok(())
    }

    async fn resolve_disk_source(&self, spec: &AttachDiskSpec) -> Result<DiskSource> {
        match (&spec.pool, &spec.volume, &spec.path) {
            (Some(pool), Some(volume), _) => {
                let volumes = self.hypervisor.list_volumes(pool).await?;
                if !volumes.iter().any(|v| v.name == *volume) {
                    return Err(HypervisorError::NotFound(format!(
                        "volume not found: {pool}/{volume}"
                    )));
                }
                Ok(DiskSource::Volume {
                    pool: pool.clone(),
                    volume: volume.clone(),
                })
            }
            (_, _, Some(path)) => Ok(DiskSource::File(path.clone())),
            _ => Err(HypervisorError::InvalidArgument(
                "attach requires pool+volume or path".to_string(),
            )),
        }
    }

    /// Attach a NIC: hot-plug when running, cold-plug via redefine otherwise.
    #[instrument(skip(self, spec))]
    pub async fn attach_nic(&self, uuid: &str, spec: &AttachNicSpec) -> Result<()> {
        validate_uuid(uuid)?;
        if spec.source.is_empty() {
            return Err(HypervisorError::InvalidArgument(
                "nic source must not be empty".to_string(),
            ));
        }

        let device = NicDevice {
            mac: Some(spec.mac.clone().unwrap_or_else(generate_mac_address)),
            kind: NicSourceKind::from_source_name(&spec.source),
            source: spec.source.clone(),
            model: spec.model.clone(),
        };
        let fragment = nic_element(&device);

        let xml = self.hypervisor.domain_xml(uuid).await?;
        self.plug_device(uuid, &xml, &fragment).await?;
        self.record(
            "vm.attach-nic",
            uuid,
            ActivityStatus::Success,
            &format!("nic attached to {}", spec.source),
        );
        Ok(())
    }

    async fn plug_device(&self, uuid: &str, xml: &str, fragment: &str) -> Result<()> {
        let runtime = self.hypervisor.domain_runtime(uuid).await?;
        if runtime.state == DomainState::Running {
            self.hypervisor.attach_device(uuid, fragment).await
        } else {
            let updated = insert_before_devices_close(xml, fragment)?;
            self.hypervisor.redefine_domain(&updated).await
        }
    }

    // =========================================================================
    // Guest agent
    // =========================================================================

    /// Ping the guest agent by domain name; on success, gather os-info,
    /// hostname and addresses.
    #[instrument(skip(self))]
    pub async fn get_guest_agent_status(&self, name: &str) -> Result<GuestAgentStatus> {
        let domains = self.hypervisor.list_domains().await?;
        let domain = domains
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| HypervisorError::NotFound(format!("domain not found: {name}")))?;

        let ping = self
            .hypervisor
            .guest_agent_command(&domain.uuid, &guest_agent::ping_command(), 5)
            .await?;
        if ping.is_none() {
            return Ok(GuestAgentStatus::default());
        }

        let os_name = match self
            .hypervisor
            .guest_agent_command(&domain.uuid, &guest_agent::osinfo_command(), 5)
            .await?
        {
            Some(response) => guest_agent::parse_os_name(&response),
            None => None,
        };
        let hostname = match self
            .hypervisor
            .guest_agent_command(&domain.uuid, &guest_agent::hostname_command(), 5)
            .await?
        {
            Some(response) => guest_agent::parse_hostname(&response),
            None => None,
        };
        let ip_addresses = match self
            .hypervisor
            .guest_agent_command(&domain.uuid, &guest_agent::interfaces_command(), 5)
            .await?
        {
            Some(response) => guest_agent::parse_ip_addresses(&response),
            None => Vec::new(),
        };

        Ok(GuestAgentStatus {
            available: true,
            os_name,
            hostname,
            ip_addresses,
        })
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Enumerate snapshots, skipping unreadable metadata silently.
    pub async fn list_snapshots(&self, uuid: &str) -> Result<Vec<SnapshotMeta>> {
        validate_uuid(uuid)?;
        let names = self.hypervisor.list_snapshot_names(uuid).await?;
        let mut snapshots = Vec::with_capacity(names.len());
        for name in names {
            match self.hypervisor.snapshot_xml(uuid, &name).await {
                Ok(xml) => match parse_snapshot_meta(&xml) {
                    Ok(meta) => snapshots.push(meta),
                    Err(e) => debug!(snapshot = %name, error = %e, "Skipping unreadable snapshot"),
                },
                Err(e) => debug!(snapshot = %name, error = %e, "Skipping unreadable snapshot"),
            }
        }
        Ok(snapshots)
    }

    #[instrument(skip(self))]
    pub async fn create_snapshot(
        &self,
        uuid: &str,
        name: &str,
        description: &str,
    ) -> Result<SnapshotMeta> {
        validate_uuid(uuid)?;
        if name.is_empty() {
            return Err(HypervisorError::InvalidArgument(
                "snapshot name must not be empty".to_string(),
            ));
        }

        let definition = snapshot_definition_xml(name, description);
        let created = self.hypervisor.define_snapshot(uuid, &definition).await?;
        let meta = parse_snapshot_meta(&created)?;

        self.record(
            "snapshot.create",
            uuid,
            ActivityStatus::Success,
            &format!("snapshot {name} created"),
        );
        Ok(meta)
    }

    #[instrument(skip(self))]
    pub async fn delete_snapshot(&self, uuid: &str, name: &str) -> Result<()> {
        validate_uuid(uuid)?;
        self.hypervisor.delete_snapshot(uuid, name).await?;
        self.record(
            "snapshot.delete",
            uuid,
            ActivityStatus::Success,
            &format!("snapshot {name} deleted"),
        );
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn revert_snapshot(&self, uuid: &str, name: &str) -> Result<()> {
        validate_uuid(uuid)?;
        self.hypervisor.revert_snapshot(uuid, name).await?;
        self.record(
            "snapshot.revert",
            uuid,
            ActivityStatus::Success,
            &format!("reverted to snapshot {name}"),
        );
        Ok(())
    }

    // =========================================================================
    // Storage
    // =========================================================================

    pub async fn list_pools(&self) -> Result<Vec<PoolRuntime>> {
        self.hypervisor.list_pools().await
    }

    pub async fn list_volumes(&self, pool: &str) -> Result<Vec<VolumeRuntime>> {
        self.hypervisor.list_volumes(pool).await
    }

    #[instrument(skip(self))]
    pub async fn create_volume(
        &self,
        pool: &str,
        name: &str,
        capacity_gb: u64,
        format: &str,
    ) -> Result<VolumeRuntime> {
        if name.is_empty() || capacity_gb == 0 {
            return Err(HypervisorError::InvalidArgument(
                "volume name and capacity are required".to_string(),
            ));
        }
        let volume = self
            .hypervisor
            .create_volume(pool, name, capacity_gb, format)
            .await?;
        self.record(
            "volume.create",
            &format!("{pool}/{name}"),
            ActivityStatus::Success,
            &format!("volume {name} created in {pool}"),
        );
        Ok(volume)
    }

    #[instrument(skip(self))]
    pub async fn delete_volume(&self, pool: &str, name: &str) -> Result<()> {
        self.hypervisor.delete_volume(pool, name).await?;
        self.record(
            "volume.delete",
            &format!("{pool}/{name}"),
            ActivityStatus::Success,
            &format!("volume {name} deleted from {pool}"),
        );
        Ok(())
    }

    // =========================================================================
    // Networks
    // =========================================================================

    pub async fn list_networks(&self) -> Result<Vec<NetworkRuntime>> {
        self.hypervisor.list_networks().await
    }

    /// Define, autostart and start a NAT network with a unique /24.
    #[instrument(skip(self))]
    pub async fn create_network(&self, name: &str, bridge: &str) -> Result<NetworkRuntime> {
        if name.is_empty() || bridge.is_empty() {
            return Err(HypervisorError::InvalidArgument(
                "network name and bridge are required".to_string(),
            ));
        }

        let mut used = Vec::new();
        for network in self.hypervisor.list_networks().await? {
            if let Ok(xml) = self.hypervisor.network_xml(&network.name).await {
                used.extend(subnet_octets(&xml));
            }
        }
        let octet = allocate_third_octet(&used)?;

        let xml = network_definition_xml(name, bridge, octet);
        self.hypervisor.define_network(&xml).await?;
        self.hypervisor.network_set_autostart(name, true).await?;
        self.hypervisor.network_set_active(name, true).await?;

        info!(network = %name, octet = octet, "Network created");
        self.record(
            "network.create",
            name,
            ActivityStatus::Success,
            &format!("network {name} created on 192.168.{octet}.0/24"),
        );

        self.hypervisor
            .list_networks()
            .await?
            .into_iter()
            .find(|n| n.name == name)
            .ok_or_else(|| HypervisorError::NotFound(format!("network not found: {name}")))
    }

    /// Start, stop or restart a network. Start on an active network is a no-op.
    #[instrument(skip(self))]
    pub async fn update_network(&self, name: &str, action: NetworkAction) -> Result<()> {
        let networks = self.hypervisor.list_networks().await?;
        let network = networks
            .iter()
            .find(|n| n.name == name)
            .ok_or_else(|| HypervisorError::NotFound(format!("network not found: {name}")))?;

        match action {
            NetworkAction::Start => {
                if !network.active {
                    self.hypervisor.network_set_active(name, true).await?;
                }
            }
            NetworkAction::Stop => {
                if network.active {
                    self.hypervisor.network_set_active(name, false).await?;
                }
            }
            NetworkAction::Restart => {
                if network.active {
                    self.hypervisor.network_set_active(name, false).await?;
                }
                self.hypervisor.network_set_active(name, true).await?;
            }
        }

        self.record(
            "network.update",
            name,
            ActivityStatus::Success,
            &format!("network {name} {:?}", action),
        );
        Ok(())
    }

    /// Destroy (if active) and undefine a network.
    ///
    /// The hypervisor-provided `default` network is reserved and refused here
    /// as well as at the API boundary.
    #[instrument(skip(self))]
    pub async fn delete_network(&self, name: &str) -> Result<()> {
        if name == RESERVED_NETWORK {
            return Err(HypervisorError::InvalidArgument(
                "the default network is reserved".to_string(),
            ));
        }

        let networks = self.hypervisor.list_networks().await?;
        let network = networks
            .iter()
            .find(|n| n.name == name)
            .ok_or_else(|| HypervisorError::NotFound(format!("network not found: {name}")))?;

        if network.active {
            self.hypervisor.network_set_active(name, false).await?;
        }
        self.hypervisor.undefine_network(name).await?;

        self.record(
            "network.delete",
            name,
            ActivityStatus::Success,
            &format!("network {name} deleted"),
        );
        Ok(())
    }

    // =========================================================================
    // Images
    // =========================================================================

    pub async fn list_images(&self) -> Result<Vec<ImageRecord>> {
        self.library.list()
    }

    #[instrument(skip(self))]
    pub async fn import_image(&self, source: &Path) -> Result<ImageRecord> {
        let record = self.library.import_from_path(source)?;
        self.record(
            "image.import",
            &record.name,
            ActivityStatus::Success,
            &format!("image {} imported", record.name),
        );
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn download_image(&self, url: &str) -> Result<ImageRecord> {
        let record = self.library.download(url).await?;
        self.record(
            "image.download",
            &record.name,
            ActivityStatus::Success,
            &format!("image {} downloaded", record.name),
        );
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn delete_image(&self, id: &str) -> Result<()> {
        self.library.delete(id)?;
        self.record(
            "image.delete",
            id,
            ActivityStatus::Success,
            &format!("image {id} deleted"),
        );
        Ok(())
    }
}

/// The snapshot with the greatest creation timestamp.
///
/// Snapshots without a parsable timestamp sort earliest; among equal
/// timestamps the later list entry wins.
fn latest_snapshot(snapshots: Vec<SnapshotMeta>) -> Option<SnapshotMeta> {
    snapshots.into_iter().max_by_key(|meta| meta.created_at)
}

/// Next free virtio target (vda, vdb, ...).
fn next_virtio_target(used: &[String]) -> Result<String> {
    for c in b'a'..=b'z' {
        let candidate = format!("vd{}", c as char);
        if !used.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(HypervisorError::Conflict(
        "no free virtio disk target".to_string(),
    ))
}
