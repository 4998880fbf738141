//! Disk image tooling built on qemu-img.
//!
//! Volumes are allocated through the hypervisor's storage pools; this module
//! materializes their contents (empty images, copy-on-write overlays,
//! resizes) by shelling out to qemu-img.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, instrument, warn};

use crate::error::{HypervisorError, Result};

/// qemu-img command wrapper.
pub struct DiskTool {
    qemu_img: String,
}

impl Default for DiskTool {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskTool {
    pub fn new() -> Self {
        Self {
            qemu_img: "qemu-img".to_string(),
        }
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            qemu_img: path.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.qemu_img)
            .args(args)
            .output()
            .map_err(|e| HypervisorError::Io(format!("failed to execute qemu-img: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HypervisorError::Io(format!(
                "qemu-img {} failed: {stderr}",
                args.first().unwrap_or(&"")
            )));
        }
        Ok(output.stdout)
    }

    /// Create an empty image.
    #[instrument(skip(self), fields(path = %path.display(), size_gb = size_gb))]
    pub fn create_image(&self, path: &Path, size_gb: u64, format: &str) -> Result<()> {
        info!("Creating disk image");
        let size = format!("{size_gb}G");
        self.run(&["create", "-f", format, path.to_str().unwrap_or_default(), &size])?;
        Ok(())
    }

    /// Rewrite `path` as a copy-on-write overlay whose backing file is `backing`.
    #[instrument(skip(self), fields(path = %path.display(), backing = %backing.display()))]
    pub fn create_overlay(&self, path: &Path, backing: &Path, backing_format: &str) -> Result<()> {
        info!("Creating overlay disk");
        if !backing.exists() {
            return Err(HypervisorError::NotFound(format!(
                "backing image does not exist: {}",
                backing.display()
            )));
        }
        self.run(&[
            "create",
            "-f",
            "qcow2",
            "-F",
            backing_format,
            "-b",
            backing.to_str().unwrap_or_default(),
            path.to_str().unwrap_or_default(),
        ])?;
        Ok(())
    }

    /// Grow an image to `size_gb`.
    #[instrument(skip(self), fields(path = %path.display(), size_gb = size_gb))]
    pub fn resize(&self, path: &Path, size_gb: u64) -> Result<()> {
        info!("Resizing disk image");
        let size = format!("{size_gb}G");
        self.run(&["resize", path.to_str().unwrap_or_default(), &size])?;
        Ok(())
    }

    /// Inspect an image.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn info(&self, path: &Path) -> Result<ImageInfo> {
        debug!("Reading disk image info");
        let stdout = self.run(&["info", "--output=json", path.to_str().unwrap_or_default()])?;
        let info: serde_json::Value = serde_json::from_slice(&stdout)
            .map_err(|e| HypervisorError::Integrity(format!("unparsable qemu-img output: {e}")))?;

        Ok(ImageInfo {
            path: path.to_path_buf(),
            format: info["format"].as_str().unwrap_or("unknown").to_string(),
            virtual_size_b: info["virtual-size"].as_u64().unwrap_or(0),
            actual_size_b: info["actual-size"].as_u64().unwrap_or(0),
            backing_file: info["backing-filename"].as_str().map(PathBuf::from),
        })
    }

    /// Remove an image file. Missing files are logged and skipped.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn delete(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)
                .map_err(|e| HypervisorError::Io(format!("failed to delete disk image: {e}")))?;
            info!("Disk image deleted");
        } else {
            warn!("Disk image not found for deletion");
        }
        Ok(())
    }
}

/// Parsed `qemu-img info` output.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub path: PathBuf,
    pub format: String,
    pub virtual_size_b: u64,
    pub actual_size_b: u64,
    pub backing_file: Option<PathBuf>,
}
