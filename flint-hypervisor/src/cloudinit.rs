//! Cloud-init NoCloud seed generation.
//!
//! The seed is a small ISO9660 filesystem labeled `cidata` carrying
//! `user-data`, `meta-data` and an empty `vendor-data`, consumed by in-guest
//! cloud-init on first boot. Seeds are staged in a temp directory and built
//! with whichever of xorrisofs/genisoimage/mkisofs is installed.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, instrument, warn};

use crate::error::{HypervisorError, Result};
use crate::types::CloudInitSpec;

/// Build the `user-data` document.
///
/// Caller-supplied raw user-data is used verbatim; otherwise a guided
/// cloud-config document is emitted from the structured spec.
pub fn build_user_data(vm_name: &str, spec: &CloudInitSpec) -> String {
    if let Some(ref raw) = spec.user_data {
        return raw.clone();
    }

    let mut lines = vec!["#cloud-config".to_string()];

    let hostname = spec.hostname.as_deref().unwrap_or(vm_name);
    lines.push(format!("hostname: {hostname}"));
    lines.push("manage_etc_hosts: true".to_string());

    let username = spec.username.as_deref().unwrap_or("flint");
    lines.push("users:".to_string());
    lines.push(format!("  - name: {username}"));
    lines.push("    groups: sudo".to_string());
    lines.push("    sudo: ALL=(ALL) NOPASSWD:ALL".to_string());
    lines.push("    shell: /bin/bash".to_string());

    if let Some(ref keys) = spec.ssh_keys {
        let keys: Vec<&str> = keys.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if !keys.is_empty() {
            lines.push("    ssh_authorized_keys:".to_string());
            for key in keys {
                lines.push(format!("      - {key}"));
            }
        }
    }

    if let Some(ref password) = spec.password {
        lines.push("ssh_pwauth: true".to_string());
        lines.push("chpasswd:".to_string());
        lines.push("  expire: false".to_string());
        lines.push("  list: |".to_string());
        lines.push(format!("    {username}:{password}"));
    }

    if let Some(ref net) = spec.network {
        lines.push("network:".to_string());
        lines.push("  version: 2".to_string());
        lines.push("  ethernets:".to_string());
        lines.push("    eth0:".to_string());
        if net.dhcp {
            lines.push("      dhcp4: true".to_string());
        } else if let Some(ref address) = net.address {
            let prefix = net.prefix.unwrap_or(24);
            lines.push(format!("      addresses: [{address}/{prefix}]"));
            if let Some(ref gateway) = net.gateway {
                lines.push(format!("      gateway4: {gateway}"));
            }
            if !net.dns.is_empty() {
                lines.push("      nameservers:".to_string());
                lines.push(format!("        addresses: [{}]", net.dns.join(", ")));
            }
        }
    }

    lines.join("\n")
}

/// Build the `meta-data` document.
pub fn build_meta_data(vm_name: &str) -> String {
    format!("instance-id: {vm_name}\nlocal-hostname: {vm_name}\n")
}

/// Generator for cloud-init seed media.
pub struct SeedGenerator {
    iso_tool: String,
}

impl Default for SeedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedGenerator {
    pub fn new() -> Self {
        Self {
            iso_tool: Self::find_iso_tool(),
        }
    }

    /// Probe for an ISO builder: xorrisofs, then genisoimage, then mkisofs.
    fn find_iso_tool() -> String {
        for tool in ["xorrisofs", "genisoimage", "mkisofs"] {
            if Command::new(tool).arg("--version").output().is_ok() {
                return tool.to_string();
            }
        }
        // Fails with a useful error at generation time if truly absent
        "genisoimage".to_string()
    }

    /// Generate the seed ISO for a VM into the library root.
    ///
    /// Returns the path `<library_root>/<vm_name>-cloudinit.iso`. The file
    /// ownership is matched to the library root so the hypervisor user can
    /// read it.
    #[instrument(skip(self, spec), fields(vm_name = %vm_name))]
    pub fn generate_seed(
        &self,
        vm_name: &str,
        spec: &CloudInitSpec,
        library_root: &Path,
    ) -> Result<PathBuf> {
        info!("Generating cloud-init seed");

        let staging = tempfile::tempdir()
            .map_err(|e| HypervisorError::Io(format!("failed to create staging dir: {e}")))?;

        let user_data = build_user_data(vm_name, spec);
        std::fs::write(staging.path().join("user-data"), &user_data)
            .map_err(|e| HypervisorError::Io(format!("failed to write user-data: {e}")))?;
        debug!(bytes = user_data.len(), "Wrote user-data");

        std::fs::write(staging.path().join("meta-data"), build_meta_data(vm_name))
            .map_err(|e| HypervisorError::Io(format!("failed to write meta-data: {e}")))?;

        std::fs::write(staging.path().join("vendor-data"), "")
            .map_err(|e| HypervisorError::Io(format!("failed to write vendor-data: {e}")))?;

        std::fs::create_dir_all(library_root)
            .map_err(|e| HypervisorError::Io(format!("failed to create library root: {e}")))?;

        let iso_path = library_root.join(format!("{vm_name}-cloudinit.iso"));

        let output = Command::new(&self.iso_tool)
            .args([
                "-output",
                iso_path.to_str().unwrap_or_default(),
                "-volid",
                "cidata",
                "-joliet",
                "-rock",
                staging.path().to_str().unwrap_or_default(),
            ])
            .output()
            .map_err(|e| {
                HypervisorError::Io(format!("failed to run {}: {e}", self.iso_tool))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HypervisorError::Io(format!("seed generation failed: {stderr}")));
        }

        inherit_ownership(&iso_path, library_root);

        info!(path = %iso_path.display(), "Cloud-init seed generated");
        Ok(iso_path)
    }
}

/// Match a file's ownership to its parent directory. Best-effort.
fn inherit_ownership(path: &Path, parent: &Path) {
    let meta = match std::fs::metadata(parent) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "Cannot stat library root for ownership inherit");
            return;
        }
    };
    let uid = nix::unistd::Uid::from_raw(meta.uid());
    let gid = nix::unistd::Gid::from_raw(meta.gid());
    if let Err(e) = nix::unistd::chown(path, Some(uid), Some(gid)) {
        warn!(path = %path.display(), error = %e, "Failed to inherit seed ownership");
    }
}
