//! Image library: a directory-rooted catalog of importable images.
//!
//! Every managed artifact (installer ISOs, cloud image templates, generated
//! cloud-init seeds) lives directly under a single library root. That root is
//! also the safety perimeter for cascade deletion: a file is only ever
//! removed if its absolute path starts with the root prefix.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use crate::error::{HypervisorError, Result};
use crate::types::{ImageKind, ImageRecord};

/// Directory-rooted image catalog.
pub struct ImageLibrary {
    root: PathBuf,
}

impl ImageLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the library root exists.
    pub fn ensure_root(&self) -> Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)
                .map_err(|e| HypervisorError::Io(format!("failed to create library root: {e}")))?;
            info!(path = %self.root.display(), "Created image library root");
        }
        Ok(())
    }

    /// Whether a path is inside the library root.
    ///
    /// Only absolute paths with the root as a prefix qualify; anything else
    /// (relative paths, traversal, system files) is outside the perimeter.
    pub fn is_managed_path(&self, path: &Path) -> bool {
        path.is_absolute() && path.starts_with(&self.root)
    }

    /// Enumerate the catalog by scanning the root directory.
    ///
    /// Generated cloud-init seeds are media, not importable images, and are
    /// excluded from the listing.
    pub fn list(&self) -> Result<Vec<ImageRecord>> {
        let mut records = Vec::new();
        if !self.root.exists() {
            return Ok(records);
        }

        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| HypervisorError::Io(format!("failed to read library root: {e}")))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let file_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            if file_name.ends_with("-cloudinit.iso") {
                continue;
            }
            let kind = match image_kind_for(&file_name) {
                Some(k) => k,
                None => continue,
            };
            let size_b = entry.metadata().map(|m| m.len()).unwrap_or(0);
            records.push(ImageRecord {
                id: image_id(&file_name),
                name: display_name(&file_name),
                kind,
                size_b,
                os_hint: os_hint_from_filename(&file_name),
                path: path.to_string_lossy().to_string(),
            });
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Resolve an image by display name.
    pub fn find_by_name(&self, name: &str) -> Result<ImageRecord> {
        self.list()?
            .into_iter()
            .find(|img| img.name == name)
            .ok_or_else(|| HypervisorError::NotFound(format!("image not found: {name}")))
    }

    /// Resolve an image by id.
    pub fn find_by_id(&self, id: &str) -> Result<ImageRecord> {
        self.list()?
            .into_iter()
            .find(|img| img.id == id)
            .ok_or_else(|| HypervisorError::NotFound(format!("image not found: {id}")))
    }

    /// Copy a local file into the library.
    #[instrument(skip(self), fields(source = %source.display()))]
    pub fn import_from_path(&self, source: &Path) -> Result<ImageRecord> {
        if !source.is_file() {
            return Err(HypervisorError::NotFound(format!(
                "import source does not exist: {}",
                source.display()
            )));
        }
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                HypervisorError::InvalidArgument("import source has no file name".to_string())
            })?
            .to_string();
        if image_kind_for(&file_name).is_none() {
            return Err(HypervisorError::InvalidArgument(format!(
                "unsupported image extension: {file_name}"
            )));
        }

        self.ensure_root()?;
        let dest = self.root.join(&file_name);
        if dest.exists() {
            return Err(HypervisorError::Conflict(format!(
                "image already exists: {file_name}"
            )));
        }

        std::fs::copy(source, &dest)
            .map_err(|e| HypervisorError::Io(format!("failed to copy image: {e}")))?;
        finalize_permissions(&dest, &self.root);

        info!(dest = %dest.display(), "Imported image");
        self.find_by_id(&image_id(&file_name))
    }

    /// Download an image over HTTP(S) into the library.
    ///
    /// The file lands under a scoped temp name and is renamed into place only
    /// after the transfer completes.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn download(&self, url: &str) -> Result<ImageRecord> {
        let parsed: reqwest::Url = url
            .parse()
            .map_err(|e| HypervisorError::InvalidArgument(format!("invalid url: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(HypervisorError::InvalidArgument(format!(
                "unsupported url scheme: {}",
                parsed.scheme()
            )));
        }

        let file_name = filename_from_url(&parsed);
        self.ensure_root()?;
        let dest = self.root.join(&file_name);
        if dest.exists() {
            return Err(HypervisorError::Conflict(format!(
                "image already exists: {file_name}"
            )));
        }

        let response = reqwest::get(parsed)
            .await
            .map_err(|e| HypervisorError::Io(format!("download failed: {e}")))?
            .error_for_status()
            .map_err(|e| HypervisorError::Io(format!("download failed: {e}")))?;

        let tmp = self.root.join(format!(".{file_name}.partial"));
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| HypervisorError::Io(format!("failed to create download file: {e}")))?;

        let mut response = response;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| HypervisorError::Io(format!("download stream failed: {e}")))?
        {
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(HypervisorError::Io(format!("failed to write download: {e}")));
            }
        }
        file.flush()
            .await
            .map_err(|e| HypervisorError::Io(format!("failed to flush download: {e}")))?;
        drop(file);

        tokio::fs::rename(&tmp, &dest)
            .await
            .map_err(|e| HypervisorError::Io(format!("failed to finalize download: {e}")))?;
        finalize_permissions(&dest, &self.root);

        info!(dest = %dest.display(), "Downloaded image");
        self.find_by_id(&image_id(&file_name))
    }

    /// Delete an image by id.
    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Result<()> {
        let record = self.find_by_id(id)?;
        std::fs::remove_file(&record.path)
            .map_err(|e| HypervisorError::Io(format!("failed to delete image: {e}")))?;
        info!(path = %record.path, "Deleted image");
        Ok(())
    }
}

/// Mode 0644 plus ownership matched to the library root. Best-effort.
fn finalize_permissions(path: &Path, root: &Path) {
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
        warn!(path = %path.display(), error = %e, "Failed to set image permissions");
    }
    if let Ok(meta) = std::fs::metadata(root) {
        let uid = nix::unistd::Uid::from_raw(meta.uid());
        let gid = nix::unistd::Gid::from_raw(meta.gid());
        if let Err(e) = nix::unistd::chown(path, Some(uid), Some(gid)) {
            warn!(path = %path.display(), error = %e, "Failed to set image ownership");
        }
    }
}

/// Stable id derived from the file name.
fn image_id(file_name: &str) -> String {
    let mut hasher = DefaultHasher::new();
    file_name.hash(&mut hasher);
    format!("img-{:016x}", hasher.finish())
}

fn display_name(file_name: &str) -> String {
    for ext in [".qcow2", ".iso", ".img", ".raw"] {
        if let Some(stripped) = file_name.strip_suffix(ext) {
            return stripped.to_string();
        }
    }
    file_name.to_string()
}

fn image_kind_for(file_name: &str) -> Option<ImageKind> {
    if file_name.ends_with(".iso") {
        Some(ImageKind::Iso)
    } else if file_name.ends_with(".qcow2") || file_name.ends_with(".img") || file_name.ends_with(".raw")
    {
        Some(ImageKind::Template)
    } else {
        None
    }
}

/// Last path segment of the URL, or a timestamped fallback.
fn filename_from_url(url: &reqwest::Url) -> String {
    let candidate = url
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or("")
        .trim()
        .to_string();
    if !candidate.is_empty() && image_kind_for(&candidate).is_some() {
        candidate
    } else {
        format!("download-{}.img", chrono::Utc::now().timestamp())
    }
}

/// Guess the guest OS from common filename patterns.
pub fn os_hint_from_filename(file_name: &str) -> Option<String> {
    let lower = file_name.to_lowercase();
    for hint in ["ubuntu", "debian", "centos", "rhel", "rocky", "alma", "fedora", "windows"] {
        if lower.contains(hint) {
            return Some(hint.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library_with(files: &[&str]) -> (tempfile::TempDir, ImageLibrary) {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            std::fs::write(dir.path().join(f), b"image-bytes").unwrap();
        }
        let lib = ImageLibrary::new(dir.path());
        (dir, lib)
    }

    #[test]
    fn list_classifies_kinds_and_skips_seeds() {
        let (_dir, lib) = library_with(&[
            "ubuntu-24.04.qcow2",
            "debian-12.iso",
            "web-01-cloudinit.iso",
            "notes.txt",
        ]);
        let records = lib.list().unwrap();
        assert_eq!(records.len(), 2);

        let template = records.iter().find(|r| r.name == "ubuntu-24.04").unwrap();
        assert_eq!(template.kind, ImageKind::Template);
        assert_eq!(template.os_hint.as_deref(), Some("ubuntu"));

        let iso = records.iter().find(|r| r.name == "debian-12").unwrap();
        assert_eq!(iso.kind, ImageKind::Iso);
    }

    #[test]
    fn ids_are_stable_across_listings() {
        let (_dir, lib) = library_with(&["ubuntu-24.04.qcow2"]);
        let a = lib.list().unwrap()[0].id.clone();
        let b = lib.list().unwrap()[0].id.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn find_by_name_misses_are_not_found() {
        let (_dir, lib) = library_with(&[]);
        assert!(matches!(
            lib.find_by_name("ghost"),
            Err(HypervisorError::NotFound(_))
        ));
    }

    #[test]
    fn managed_path_gate() {
        let (dir, lib) = library_with(&[]);
        assert!(lib.is_managed_path(&dir.path().join("x.qcow2")));
        assert!(!lib.is_managed_path(Path::new("/etc/passwd")));
        assert!(!lib.is_managed_path(Path::new("relative/x.qcow2")));
    }

    #[test]
    fn import_copies_and_rejects_duplicates() {
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("cirros.img");
        std::fs::write(&src, b"disk").unwrap();

        let (_dir, lib) = library_with(&[]);
        let record = lib.import_from_path(&src).unwrap();
        assert_eq!(record.name, "cirros");
        assert!(Path::new(&record.path).exists());

        assert!(matches!(
            lib.import_from_path(&src),
            Err(HypervisorError::Conflict(_))
        ));
    }

    #[test]
    fn delete_by_id_removes_file() {
        let (_dir, lib) = library_with(&["fedora-40.iso"]);
        let record = lib.list().unwrap()[0].clone();
        lib.delete(&record.id).unwrap();
        assert!(!Path::new(&record.path).exists());
        assert!(lib.list().unwrap().is_empty());
    }

    #[test]
    fn url_filename_derivation() {
        let url: reqwest::Url = "https://cloud-images.ubuntu.com/noble/noble-server.img"
            .parse()
            .unwrap();
        assert_eq!(filename_from_url(&url), "noble-server.img");

        let bare: reqwest::Url = "https://example.com/".parse().unwrap();
        assert!(filename_from_url(&bare).starts_with("download-"));
    }
}
