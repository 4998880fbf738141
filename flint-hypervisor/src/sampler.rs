//! Concurrent two-shot sampling of domain counters.
//!
//! Rates are computed by differencing cumulative counters across a single
//! global sample window rather than sleeping once per domain: both passes
//! collect every domain in parallel and exactly one sleep separates them.

use std::time::Duration;

use futures::future::join_all;
use tracing::debug;

use crate::error::Result;
use crate::guest_agent;
use crate::traits::Hypervisor;
use crate::types::{DomainRuntime, DomainSummary};

/// Default sample window.
pub const DEFAULT_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// CPU utilization over a window from two cumulative counters.
///
/// The result is not normalized by vCPU count; a 4-vCPU domain saturating
/// all cores yields ~400.
pub fn cpu_percent(cpu_ns_first: u64, cpu_ns_second: u64, window: Duration) -> f64 {
    let window_secs = window.as_secs_f64();
    if window_secs <= 0.0 || cpu_ns_second <= cpu_ns_first {
        return 0.0;
    }
    let used_secs = (cpu_ns_second - cpu_ns_first) as f64 / 1e9;
    used_secs / window_secs * 100.0
}

/// Guest OS hint from a raw domain description.
///
/// Used when the guest agent is unreachable; matches the description text
/// against well-known substrings.
pub fn os_hint_from_description(xml: &str) -> String {
    let lower = xml.to_lowercase();
    if lower.contains("ubuntu") {
        "Ubuntu".to_string()
    } else if lower.contains("centos") || lower.contains("rhel") {
        "CentOS/RHEL".to_string()
    } else if lower.contains("windows") {
        "Windows".to_string()
    } else {
        "Unknown".to_string()
    }
}

/// Sample all domains and produce API summaries.
///
/// 1. Enumerate once.
/// 2. Collect first-pass counters for every domain in parallel.
/// 3. Sleep one window, globally.
/// 4. Collect second-pass counters in parallel.
/// 5. Difference the counters; enrich with guest-agent OS/IP info.
///
/// Domains that disappear between the passes are dropped from the result.
pub async fn sample_summaries(
    hypervisor: &dyn Hypervisor,
    window: Duration,
) -> Result<Vec<DomainSummary>> {
    let domains = hypervisor.list_domains().await?;
    debug!(count = domains.len(), "Sampling domains");

    let first: Vec<Option<DomainRuntime>> = join_all(
        domains
            .iter()
            .map(|d| async move { hypervisor.domain_runtime(&d.uuid).await.ok() }),
    )
    .await;

    tokio::time::sleep(window).await;

    let second: Vec<Option<DomainRuntime>> = join_all(
        domains
            .iter()
            .map(|d| async move { hypervisor.domain_runtime(&d.uuid).await.ok() }),
    )
    .await;

    let summaries = join_all(
        first
            .into_iter()
            .zip(second)
            .filter_map(|pair| match pair {
                (Some(a), Some(b)) => Some((a, b)),
                _ => None,
            })
            .map(|(info_1, info_2)| async move {
                let (os_hint, ip_addresses) = guest_identity(hypervisor, &info_2).await;
                DomainSummary {
                    uuid: info_2.uuid.clone(),
                    name: info_2.name.clone(),
                    state: info_2.state,
                    cpu_percent: cpu_percent(info_1.cpu_time_ns, info_2.cpu_time_ns, window),
                    memory_kb: info_2.memory_kb,
                    max_memory_kb: info_2.max_memory_kb,
                    vcpus: info_2.vcpus,
                    os_hint,
                    ip_addresses,
                }
            }),
    )
    .await;

    Ok(summaries)
}

/// OS hint and guest IPs, preferring the guest agent and falling back to the
/// domain description.
pub async fn guest_identity(
    hypervisor: &dyn Hypervisor,
    runtime: &DomainRuntime,
) -> (String, Vec<String>) {
    let os_from_agent = match hypervisor
        .guest_agent_command(&runtime.uuid, &guest_agent::osinfo_command(), 5)
        .await
    {
        Ok(Some(response)) => guest_agent::parse_os_name(&response),
        _ => None,
    };

    let os_hint = match os_from_agent {
        Some(name) => name,
        None => match hypervisor.domain_xml(&runtime.uuid).await {
            Ok(xml) => os_hint_from_description(&xml),
            Err(_) => "Unknown".to_string(),
        },
    };

    let ip_addresses = match hypervisor
        .guest_agent_command(&runtime.uuid, &guest_agent::interfaces_command(), 5)
        .await
    {
        Ok(Some(response)) => guest_agent::parse_ip_addresses(&response),
        _ => Vec::new(),
    };

    (os_hint, ip_addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiescent_domain_is_zero() {
        assert_eq!(cpu_percent(5_000_000_000, 5_000_000_000, Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn counter_regression_is_zero() {
        assert_eq!(cpu_percent(9_000_000_000, 5_000_000_000, Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn single_core_saturation_is_about_100() {
        let pct = cpu_percent(0, 1_000_000_000, Duration::from_secs(1));
        assert!((pct - 100.0).abs() < 1e-6);
    }

    #[test]
    fn multi_vcpu_saturation_exceeds_100() {
        // 4 vCPUs fully busy for 1 second burn 4s of CPU time
        let pct = cpu_percent(0, 4_000_000_000, Duration::from_secs(1));
        assert!((pct - 400.0).abs() < 1e-6);
    }

    #[test]
    fn window_scaling() {
        let pct = cpu_percent(0, 1_000_000_000, Duration::from_secs(2));
        assert!((pct - 50.0).abs() < 1e-6);
    }

    #[test]
    fn description_hints() {
        assert_eq!(os_hint_from_description("<domain><name>ubuntu-vm</name></domain>"), "Ubuntu");
        assert_eq!(os_hint_from_description("... rhel9 ..."), "CentOS/RHEL");
        assert_eq!(os_hint_from_description("... Windows Server ..."), "Windows");
        assert_eq!(os_hint_from_description("<domain/>"), "Unknown");
    }
}
