//! End-to-end domain creation.
//!
//! The create flow is ordered so that every failure before the domain is
//! defined rolls the provisioned volume back, while failures after the
//! define (cloud-init attach, autostart) leave the domain in place:
//!
//! `Pending → VolumeReady → Defined → CloudInitAttached? → Running?`

use std::path::Path;

use tracing::{info, instrument, warn};

use crate::cloudinit::SeedGenerator;
use crate::domain_xml::{
    disk_element, insert_before_devices_close, used_disk_targets, DiskDevice, DiskSource,
    DomainDescriptor, NicDevice,
};
use crate::error::{HypervisorError, Result};
use crate::images::ImageLibrary;
use crate::traits::Hypervisor;
use crate::types::*;

/// IDE targets eligible for the cloud-init CD-ROM, in preference order.
const SEED_TARGETS: [&str; 2] = ["hdc", "hdd"];

const GIB: u64 = 1024 * 1024 * 1024;

/// Result of a create flow: the new domain plus any non-fatal warnings.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub uuid: String,
    pub warnings: Vec<String>,
}

/// Composes domain definitions and drives the create flow.
pub struct DomainComposer<'a> {
    hypervisor: &'a dyn Hypervisor,
    library: &'a ImageLibrary,
    seeds: &'a SeedGenerator,
}

impl<'a> DomainComposer<'a> {
    pub fn new(
        hypervisor: &'a dyn Hypervisor,
        library: &'a ImageLibrary,
        seeds: &'a SeedGenerator,
    ) -> Self {
        Self {
            hypervisor,
            library,
            seeds,
        }
    }

    /// Create a domain from a creation spec.
    #[instrument(skip(self, spec), fields(vm_name = %spec.name))]
    pub async fn create(&self, spec: &VmCreateSpec) -> Result<CreateOutcome> {
        validate_spec(spec)?;
        let mut warnings = Vec::new();

        // Resolve image
        let image = self.library.find_by_name(&spec.image_name)?;
        if image.kind != spec.image_kind {
            return Err(HypervisorError::InvalidArgument(format!(
                "image {} is {}, requested {}",
                image.name,
                image.kind.as_str(),
                spec.image_kind.as_str()
            )));
        }

        // Provision the primary disk
        let volume_name = format!("{}-disk-0.qcow2", spec.name);
        self.provision_disk(spec, &image, &volume_name).await?;

        // Generate the cloud-init seed; failure is non-fatal
        let seed_path = if spec.enable_cloud_init {
            let cloud_init = spec.cloud_init.clone().unwrap_or_default();
            match self
                .seeds
                .generate_seed(&spec.name, &cloud_init, self.library.root())
            {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "Cloud-init seed generation failed, continuing without seed");
                    warnings.push(format!("cloud-init seed generation failed: {e}"));
                    None
                }
            }
        } else {
            None
        };

        // Compose and define
        let xml = self.compose(spec, &image, &volume_name).build();
        let uuid = match self.hypervisor.define_domain(&xml).await {
            Ok(uuid) => uuid,
            Err(e) => {
                warn!(error = %e, "Define failed, rolling back volume");
                self.rollback_volume(&spec.disk_pool, &volume_name).await;
                if let Some(ref seed) = seed_path {
                    let _ = std::fs::remove_file(seed);
                }
                return Err(e);
            }
        };
        info!(uuid = %uuid, "Domain defined");

        // Attach the seed; failure is non-fatal
        if let Some(ref seed) = seed_path {
            if let Err(e) = self.attach_seed(&uuid, seed).await {
                warn!(error = %e, "Cloud-init attach failed, domain left without seed media");
                warnings.push(format!("cloud-init attach failed: {e}"));
            }
        }

        if spec.start_on_create {
            self.hypervisor
                .domain_action(&uuid, LifecycleAction::Start)
                .await?;
        }

        Ok(CreateOutcome { uuid, warnings })
    }

    async fn provision_disk(
        &self,
        spec: &VmCreateSpec,
        image: &ImageRecord,
        volume_name: &str,
    ) -> Result<()> {
        match spec.image_kind {
            ImageKind::Template => {
                let backing = Path::new(&image.path);
                // Compared in bytes: flooring to whole GiB would wave through
                // a backing image fractionally larger than the request
                let backing_b = self.hypervisor.image_virtual_size_b(backing).await?;
                if backing_b > spec.disk_size_gb * GIB {
                    return Err(HypervisorError::InvalidArgument(format!(
                        "disk_size_gb {} is smaller than the backing image {} ({backing_b} bytes)",
                        spec.disk_size_gb, image.name
                    )));
                }

                self.hypervisor
                    .create_volume(&spec.disk_pool, volume_name, spec.disk_size_gb, "qcow2")
                    .await?;

                let backing_format = backing_format_of(&image.path);
                if let Err(e) = self
                    .hypervisor
                    .materialize_overlay(&spec.disk_pool, volume_name, backing, backing_format)
                    .await
                {
                    self.rollback_volume(&spec.disk_pool, volume_name).await;
                    return Err(e);
                }
                if let Err(e) = self
                    .hypervisor
                    .resize_volume(&spec.disk_pool, volume_name, spec.disk_size_gb)
                    .await
                {
                    self.rollback_volume(&spec.disk_pool, volume_name).await;
                    return Err(e);
                }
                Ok(())
            }
            ImageKind::Iso => {
                // Empty install target; the ISO itself rides on a CD-ROM
                self.hypervisor
                    .create_volume(&spec.disk_pool, volume_name, spec.disk_size_gb, "qcow2")
                    .await
                    .map(|_| ())
            }
        }
    }

    fn compose(
        &self,
        spec: &VmCreateSpec,
        image: &ImageRecord,
        volume_name: &str,
    ) -> DomainDescriptor {
        let mut descriptor = DomainDescriptor::new(&spec.name, spec.memory_mb, spec.vcpus)
            .with_disk(DiskDevice::primary(
                DiskSource::Volume {
                    pool: spec.disk_pool.clone(),
                    volume: volume_name.to_string(),
                },
                "qcow2",
            ));

        if spec.image_kind == ImageKind::Iso {
            descriptor = descriptor.with_disk(DiskDevice::cdrom(&image.path, "sdb", "sata"));
        }

        descriptor.with_nic(NicDevice {
            mac: Some(generate_mac_address()),
            kind: NicSourceKind::from_source_name(&spec.network_name),
            source: spec.network_name.clone(),
            model: "virtio".to_string(),
        })
    }

    /// Cold-attach the seed CD-ROM on the first free IDE target.
    async fn attach_seed(&self, uuid: &str, seed: &Path) -> Result<()> {
        let xml = self.hypervisor.domain_xml(uuid).await?;
        let used = used_disk_targets(&xml)?;
        let target = SEED_TARGETS
            .iter()
            .find(|t| !used.contains(&t.to_string()))
            .ok_or_else(|| {
                HypervisorError::Conflict("no free IDE target for the seed CD-ROM".to_string())
            })?;

        let fragment = disk_element(&DiskDevice::cdrom(
            &seed.to_string_lossy(),
            target,
            "ide",
        ));
        let updated = insert_before_devices_close(&xml, &fragment)?;
        self.hypervisor.redefine_domain(&updated).await
    }

    async fn rollback_volume(&self, pool: &str, volume: &str) {
        if let Err(e) = self.hypervisor.delete_volume(pool, volume).await {
            warn!(pool = %pool, volume = %volume, error = %e, "Volume rollback failed");
        }
    }
}

fn validate_spec(spec: &VmCreateSpec) -> Result<()> {
    if spec.name.is_empty() {
        return Err(HypervisorError::InvalidArgument("name must not be empty".to_string()));
    }
    if spec.name.len() > 64 || spec.name.contains('/') {
        return Err(HypervisorError::InvalidArgument(format!(
            "invalid domain name: {}",
            spec.name
        )));
    }
    if spec.memory_mb == 0 || spec.vcpus == 0 || spec.disk_size_gb == 0 {
        return Err(HypervisorError::InvalidArgument(
            "memory_mb, vcpus and disk_size_gb must be positive".to_string(),
        ));
    }
    Ok(())
}

/// qemu-img backing format for a library image path.
fn backing_format_of(path: &str) -> &'static str {
    if path.ends_with(".raw") || path.ends_with(".img") {
        "raw"
    } else {
        "qcow2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_xml::parse_devices;
    use crate::mock::MockHypervisor;
    use crate::types::DomainState;

    fn test_spec(name: &str, kind: ImageKind, image: &str) -> VmCreateSpec {
        VmCreateSpec {
            name: name.to_string(),
            memory_mb: 2048,
            vcpus: 2,
            disk_pool: "default".to_string(),
            disk_size_gb: 20,
            image_name: image.to_string(),
            image_kind: kind,
            enable_cloud_init: false,
            cloud_init: None,
            start_on_create: false,
            network_name: "default".to_string(),
        }
    }

    fn library_with_template() -> (tempfile::TempDir, ImageLibrary) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ubuntu-24.04.qcow2"), b"base").unwrap();
        std::fs::write(dir.path().join("debian-12.iso"), b"iso").unwrap();
        let lib = ImageLibrary::new(dir.path());
        (dir, lib)
    }

    #[tokio::test]
    async fn template_create_wires_overlay_disk() {
        let mock = MockHypervisor::new();
        let (_dir, lib) = library_with_template();
        let seeds = SeedGenerator::new();
        let composer = DomainComposer::new(&mock, &lib, &seeds);

        let outcome = composer
            .create(&test_spec("web-01", ImageKind::Template, "ubuntu-24.04"))
            .await
            .unwrap();
        assert!(outcome.warnings.is_empty());

        let xml = mock.domain_xml(&outcome.uuid).await.unwrap();
        let (disks, nics) = parse_devices(&xml).unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].target, "vda");
        assert_eq!(disks[0].format, "qcow2");
        assert_eq!(nics.len(), 1);
        assert_eq!(nics[0].source_name, "default");

        // Overlay was materialized against the resolved image
        let volume = &mock.list_volumes("default").await.unwrap()[0];
        let body = std::fs::read_to_string(&volume.path).unwrap();
        assert!(body.contains("ubuntu-24.04.qcow2"));
    }

    #[tokio::test]
    async fn iso_create_attaches_boot_cdrom() {
        let mock = MockHypervisor::new();
        let (_dir, lib) = library_with_template();
        let seeds = SeedGenerator::new();
        let composer = DomainComposer::new(&mock, &lib, &seeds);

        let outcome = composer
            .create(&test_spec("install-01", ImageKind::Iso, "debian-12"))
            .await
            .unwrap();

        let xml = mock.domain_xml(&outcome.uuid).await.unwrap();
        let (disks, _) = parse_devices(&xml).unwrap();
        assert_eq!(disks.len(), 2);
        let cdrom = disks.iter().find(|d| d.target == "sdb").unwrap();
        assert_eq!(cdrom.device, DiskDeviceKind::Cdrom);
        assert!(cdrom.source.ends_with("debian-12.iso"));
    }

    #[tokio::test]
    async fn no_cloud_init_means_no_ide_cdrom() {
        let mock = MockHypervisor::new();
        let (_dir, lib) = library_with_template();
        let seeds = SeedGenerator::new();
        let composer = DomainComposer::new(&mock, &lib, &seeds);

        let outcome = composer
            .create(&test_spec("web-01", ImageKind::Template, "ubuntu-24.04"))
            .await
            .unwrap();

        let xml = mock.domain_xml(&outcome.uuid).await.unwrap();
        let (disks, _) = parse_devices(&xml).unwrap();
        assert!(disks.iter().all(|d| !d.target.starts_with("hd")));
        assert!(!lib.root().join("web-01-cloudinit.iso").exists());
    }

    #[tokio::test]
    async fn missing_image_fails_before_any_volume() {
        let mock = MockHypervisor::new();
        let (_dir, lib) = library_with_template();
        let seeds = SeedGenerator::new();
        let composer = DomainComposer::new(&mock, &lib, &seeds);

        let err = composer
            .create(&test_spec("web-01", ImageKind::Template, "ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::NotFound(_)));
        assert!(mock.list_volumes("default").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_backing_image_is_rejected() {
        let mock = MockHypervisor::new();
        let (dir, lib) = library_with_template();
        let seeds = SeedGenerator::new();

        mock.set_image_virtual_size(&dir.path().join("ubuntu-24.04.qcow2"), 50 * GIB)
            .await;

        let composer = DomainComposer::new(&mock, &lib, &seeds);
        let err = composer
            .create(&test_spec("web-01", ImageKind::Template, "ubuntu-24.04"))
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::InvalidArgument(_)));
        assert!(mock.list_volumes("default").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fractionally_oversized_backing_image_is_rejected() {
        let mock = MockHypervisor::new();
        let (dir, lib) = library_with_template();
        let seeds = SeedGenerator::new();

        // 20.5 GiB backing against a 20 GiB request must not slip through
        mock.set_image_virtual_size(
            &dir.path().join("ubuntu-24.04.qcow2"),
            20 * GIB + 512 * 1024 * 1024,
        )
        .await;

        let composer = DomainComposer::new(&mock, &lib, &seeds);
        let err = composer
            .create(&test_spec("web-01", ImageKind::Template, "ubuntu-24.04"))
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::InvalidArgument(_)));
        assert!(mock.list_volumes("default").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn backing_image_at_exact_request_size_is_accepted() {
        let mock = MockHypervisor::new();
        let (dir, lib) = library_with_template();
        let seeds = SeedGenerator::new();

        mock.set_image_virtual_size(&dir.path().join("ubuntu-24.04.qcow2"), 20 * GIB)
            .await;

        let composer = DomainComposer::new(&mock, &lib, &seeds);
        let outcome = composer
            .create(&test_spec("web-01", ImageKind::Template, "ubuntu-24.04"))
            .await
            .unwrap();
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn define_failure_rolls_back_volume() {
        let mock = MockHypervisor::new();
        let (_dir, lib) = library_with_template();
        let seeds = SeedGenerator::new();
        let composer = DomainComposer::new(&mock, &lib, &seeds);

        // Pre-existing domain with the same name makes the define conflict
        composer
            .create(&test_spec("web-01", ImageKind::Template, "ubuntu-24.04"))
            .await
            .unwrap();
        mock.delete_volume("default", "web-01-disk-0.qcow2")
            .await
            .unwrap();

        let err = composer
            .create(&test_spec("web-01", ImageKind::Template, "ubuntu-24.04"))
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::Conflict(_)));
        assert!(mock.list_volumes("default").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_on_create_runs_the_domain() {
        let mock = MockHypervisor::new();
        let (_dir, lib) = library_with_template();
        let seeds = SeedGenerator::new();
        let composer = DomainComposer::new(&mock, &lib, &seeds);

        let mut spec = test_spec("web-01", ImageKind::Template, "ubuntu-24.04");
        spec.start_on_create = true;
        let outcome = composer.create(&spec).await.unwrap();

        assert_eq!(
            mock.domain_runtime(&outcome.uuid).await.unwrap().state,
            DomainState::Running
        );
    }

    #[tokio::test]
    async fn invalid_specs_are_rejected() {
        let mock = MockHypervisor::new();
        let (_dir, lib) = library_with_template();
        let seeds = SeedGenerator::new();
        let composer = DomainComposer::new(&mock, &lib, &seeds);

        let mut empty_name = test_spec("", ImageKind::Template, "ubuntu-24.04");
        empty_name.name = String::new();
        assert!(composer.create(&empty_name).await.is_err());

        let mut zero_mem = test_spec("x", ImageKind::Template, "ubuntu-24.04");
        zero_mem.memory_mb = 0;
        assert!(composer.create(&zero_mem).await.is_err());

        let mut kind_mismatch = test_spec("x", ImageKind::Iso, "ubuntu-24.04");
        kind_mismatch.image_kind = ImageKind::Iso;
        assert!(matches!(
            composer.create(&kind_mismatch).await,
            Err(HypervisorError::InvalidArgument(_))
        ));
    }
}
