//! Backend-neutral hypervisor operation set.

use async_trait::async_trait;

use crate::console::ConsoleChannel;
use crate::error::Result;
use crate::types::*;

/// The thin operation set the control layer is written against.
///
/// Implementations own the live hypervisor session. All per-call handles are
/// acquired, used and released within a single method; callers never see raw
/// handles. Mutating verbs are safe to call concurrently - backends serialize
/// them internally where the underlying session requires it.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    // =========================================================================
    // Host
    // =========================================================================

    /// Check that the hypervisor session is alive.
    async fn ping(&self) -> Result<bool>;

    /// Host CPU/memory counters.
    async fn node_resources(&self) -> Result<NodeResources>;

    // =========================================================================
    // Domains
    // =========================================================================

    /// Enumerate all defined domains with their runtime counters.
    async fn list_domains(&self) -> Result<Vec<DomainRuntime>>;

    /// Runtime counters for one domain.
    async fn domain_runtime(&self, uuid: &str) -> Result<DomainRuntime>;

    /// Raw description of one domain.
    async fn domain_xml(&self, uuid: &str) -> Result<String>;

    /// Define a new persistent domain; returns its UUID.
    async fn define_domain(&self, xml: &str) -> Result<String>;

    /// Replace the definition of an existing domain (cold-plug path).
    async fn redefine_domain(&self, xml: &str) -> Result<()>;

    /// Remove a domain definition.
    async fn undefine_domain(&self, uuid: &str) -> Result<()>;

    /// Apply a lifecycle verb.
    async fn domain_action(&self, uuid: &str, action: LifecycleAction) -> Result<()>;

    /// Hot-plug a device element into a running domain.
    async fn attach_device(&self, uuid: &str, device_xml: &str) -> Result<()>;

    /// One-shot performance counters. Absent devices yield zeros.
    async fn performance_counters(&self, uuid: &str) -> Result<PerformanceSample>;

    /// Issue a guest-agent command; `None` when the agent is unreachable.
    async fn guest_agent_command(
        &self,
        uuid: &str,
        command_json: &str,
        timeout_secs: i32,
    ) -> Result<Option<String>>;

    // =========================================================================
    // Snapshots
    // =========================================================================

    async fn list_snapshot_names(&self, uuid: &str) -> Result<Vec<String>>;

    async fn snapshot_xml(&self, uuid: &str, name: &str) -> Result<String>;

    /// Define a snapshot from a minimal description; returns its metadata XML.
    async fn define_snapshot(&self, uuid: &str, snapshot_xml: &str) -> Result<String>;

    async fn delete_snapshot(&self, uuid: &str, name: &str) -> Result<()>;

    async fn revert_snapshot(&self, uuid: &str, name: &str) -> Result<()>;

    // =========================================================================
    // Storage
    // =========================================================================

    async fn list_pools(&self) -> Result<Vec<PoolRuntime>>;

    async fn list_volumes(&self, pool: &str) -> Result<Vec<VolumeRuntime>>;

    /// Create a volume in a pool; returns the created volume record.
    async fn create_volume(
        &self,
        pool: &str,
        name: &str,
        capacity_gb: u64,
        format: &str,
    ) -> Result<VolumeRuntime>;

    async fn delete_volume(&self, pool: &str, name: &str) -> Result<()>;

    /// Rewrite a volume as a copy-on-write overlay over a backing image.
    async fn materialize_overlay(
        &self,
        pool: &str,
        volume: &str,
        backing: &std::path::Path,
        backing_format: &str,
    ) -> Result<()>;

    /// Grow a volume to the given size.
    async fn resize_volume(&self, pool: &str, volume: &str, new_gb: u64) -> Result<()>;

    /// Virtual size of a disk image file in bytes.
    async fn image_virtual_size_b(&self, path: &std::path::Path) -> Result<u64>;

    // =========================================================================
    // Networks
    // =========================================================================

    async fn list_networks(&self) -> Result<Vec<NetworkRuntime>>;

    async fn network_xml(&self, name: &str) -> Result<String>;

    async fn define_network(&self, xml: &str) -> Result<()>;

    /// Start or stop a network. Starting an active network is a no-op.
    async fn network_set_active(&self, name: &str, active: bool) -> Result<()>;

    async fn network_set_autostart(&self, name: &str, autostart: bool) -> Result<()>;

    async fn undefine_network(&self, name: &str) -> Result<()>;

    // =========================================================================
    // Console
    // =========================================================================

    /// Open the default console of a domain as a pair of bounded byte pipes.
    async fn open_console(&self, uuid: &str) -> Result<ConsoleChannel>;
}
