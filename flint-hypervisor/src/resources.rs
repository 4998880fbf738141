//! Host resource aggregation and health composition.
//!
//! Storage pools frequently share a filesystem (several directory pools on
//! one mount). Capacity is therefore keyed by filesystem identity and summed
//! once per unique filesystem, while allocation is summed across all pools
//! since it reflects actual usage and cannot double-count.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::types::{DomainRuntime, HealthLevel, HostHealth, PoolRuntime, PoolState};

/// Identity and capacity of the filesystem backing a pool path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilesystemSample {
    /// 64-bit filesystem id from statvfs
    pub fs_key: u64,
    /// `blocks × fragment_size` of the whole filesystem
    pub capacity_b: u64,
}

/// Per-pool usage fed into the aggregate.
#[derive(Debug, Clone)]
pub struct PoolUsage {
    pub allocation_b: u64,
    /// `None` when the pool path could not be probed
    pub filesystem: Option<FilesystemSample>,
}

/// Probe the filesystem behind a path.
pub fn probe_filesystem(path: &Path) -> Option<FilesystemSample> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    let capacity_b = stat.blocks() as u64 * stat.fragment_size() as u64;
    Some(FilesystemSample {
        fs_key: stat.filesystem_id() as u64,
        capacity_b,
    })
}

/// Deduplicated storage aggregate: `(total_bytes, used_bytes)`.
pub fn aggregate_storage(pools: &[PoolUsage]) -> (u64, u64) {
    let mut filesystems: HashMap<u64, u64> = HashMap::new();
    let mut used = 0u64;

    for pool in pools {
        used = used.saturating_add(pool.allocation_b);
        if let Some(fs) = pool.filesystem {
            filesystems.insert(fs.fs_key, fs.capacity_b);
        }
    }

    let total = filesystems.values().sum();
    debug!(
        pools = pools.len(),
        filesystems = filesystems.len(),
        "Aggregated pool storage"
    );
    (total, used)
}

/// Compose the host health report.
///
/// Crashed domains and >95% storage usage are errors; inactive pools and
/// >85% usage are warnings; otherwise an informational summary of active vs
/// total domains.
pub fn compose_health(
    domains: &[DomainRuntime],
    pools: &[PoolRuntime],
    storage_total_b: u64,
    storage_used_b: u64,
) -> HostHealth {
    let mut level = HealthLevel::Info;
    let mut messages = Vec::new();

    let mut raise = |level: &mut HealthLevel, to: HealthLevel| {
        if to > *level {
            *level = to;
        }
    };

    for domain in domains {
        if domain.state == crate::types::DomainState::Crashed {
            raise(&mut level, HealthLevel::Error);
            messages.push(format!("domain {} has crashed", domain.name));
        }
    }

    for pool in pools {
        if pool.state != PoolState::Active {
            raise(&mut level, HealthLevel::Warning);
            messages.push(format!("storage pool {} is not active", pool.name));
        }
    }

    if storage_total_b > 0 {
        let usage = storage_used_b as f64 / storage_total_b as f64 * 100.0;
        if usage > 95.0 {
            raise(&mut level, HealthLevel::Error);
            messages.push(format!("storage usage critical: {usage:.1}%"));
        } else if usage > 85.0 {
            raise(&mut level, HealthLevel::Warning);
            messages.push(format!("storage usage high: {usage:.1}%"));
        }
    }

    let active = domains.iter().filter(|d| d.state.is_active()).count() as u32;
    let total = domains.len() as u32;
    if messages.is_empty() {
        messages.push(format!("{active} of {total} domains active"));
    }

    HostHealth {
        level,
        messages,
        active_domains: active,
        total_domains: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DomainState;

    fn fs(key: u64, capacity: u64) -> Option<FilesystemSample> {
        Some(FilesystemSample {
            fs_key: key,
            capacity_b: capacity,
        })
    }

    fn domain(name: &str, state: DomainState) -> DomainRuntime {
        DomainRuntime {
            uuid: format!("{name}-uuid"),
            name: name.to_string(),
            state,
            memory_kb: 1024,
            max_memory_kb: 2048,
            vcpus: 1,
            cpu_time_ns: 0,
        }
    }

    fn pool(name: &str, state: PoolState) -> PoolRuntime {
        PoolRuntime {
            name: name.to_string(),
            state,
            capacity_b: 100,
            allocation_b: 10,
            path: "/var/lib/pool".to_string(),
        }
    }

    #[test]
    fn shared_filesystem_counted_once() {
        let pools = vec![
            PoolUsage { allocation_b: 10, filesystem: fs(7, 1000) },
            PoolUsage { allocation_b: 20, filesystem: fs(7, 1000) },
            PoolUsage { allocation_b: 5, filesystem: fs(9, 500) },
        ];
        let (total, used) = aggregate_storage(&pools);
        assert_eq!(total, 1500);
        assert_eq!(used, 35);
    }

    #[test]
    fn unprobeable_pool_still_counts_allocation() {
        let pools = vec![PoolUsage { allocation_b: 42, filesystem: None }];
        let (total, used) = aggregate_storage(&pools);
        assert_eq!(total, 0);
        assert_eq!(used, 42);
    }

    #[test]
    fn probe_dedupes_real_directories() {
        // Two directories on the same filesystem must share a key
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let fa = probe_filesystem(a.path()).unwrap();
        let fb = probe_filesystem(b.path()).unwrap();
        assert_eq!(fa.fs_key, fb.fs_key);
        assert_eq!(fa.capacity_b, fb.capacity_b);
        assert!(fa.capacity_b > 0);
    }

    #[test]
    fn healthy_host_is_informational() {
        let health = compose_health(
            &[domain("a", DomainState::Running), domain("b", DomainState::Shutoff)],
            &[pool("default", PoolState::Active)],
            1000,
            100,
        );
        assert_eq!(health.level, HealthLevel::Info);
        assert_eq!(health.active_domains, 1);
        assert_eq!(health.total_domains, 2);
        assert_eq!(health.messages, vec!["1 of 2 domains active".to_string()]);
    }

    #[test]
    fn crashed_domain_is_error() {
        let health = compose_health(&[domain("a", DomainState::Crashed)], &[], 0, 0);
        assert_eq!(health.level, HealthLevel::Error);
        assert!(health.messages[0].contains("crashed"));
    }

    #[test]
    fn inactive_pool_is_warning() {
        let health = compose_health(&[], &[pool("stale", PoolState::Inactive)], 1000, 0);
        assert_eq!(health.level, HealthLevel::Warning);
    }

    #[test]
    fn storage_thresholds() {
        let warn = compose_health(&[], &[], 1000, 900);
        assert_eq!(warn.level, HealthLevel::Warning);

        let err = compose_health(&[], &[], 1000, 990);
        assert_eq!(err.level, HealthLevel::Error);

        let ok = compose_health(&[], &[], 1000, 100);
        assert_eq!(ok.level, HealthLevel::Info);
    }
}
