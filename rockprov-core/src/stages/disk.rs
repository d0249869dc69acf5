//! NVMe OS install: stream the image onto the disk, then grow root to fill it.

use super::Steps;
use crate::checksum::ChecksumVerifier;
use crate::config::{ProvisioningConfig, ROOT_PARTITION_NUMBER};
use crate::config_states::ArmedConfig;
use crate::errors::{ProvisionError, StageResult};
use crate::fetch::ImageFetcher;
use crate::report::StageRecord;
use rockprov_hal::{Codec, FlashOptions, PartedOp, PartedOptions, ProvisionHal};
use std::fmt;

pub const STAGE_NAME: &str = "disk";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskStep {
    CheckDiskPresent,
    FetchOsImage,
    VerifyOsImage,
    WriteOsImage,
    NormalizePartitionTable,
    ResizeSecondPartition,
    FilesystemCheck,
    ResizeFilesystem,
}

impl DiskStep {
    pub fn name(self) -> &'static str {
        match self {
            DiskStep::CheckDiskPresent => "CheckDiskPresent",
            DiskStep::FetchOsImage => "FetchOsImage",
            DiskStep::VerifyOsImage => "VerifyOsImage",
            DiskStep::WriteOsImage => "WriteOsImage",
            DiskStep::NormalizePartitionTable => "NormalizePartitionTable",
            DiskStep::ResizeSecondPartition => "ResizeSecondPartition",
            DiskStep::FilesystemCheck => "FilesystemCheck",
            DiskStep::ResizeFilesystem => "ResizeFilesystem",
        }
    }

    /// Steps that run for this config; `VerifyOsImage` needs a declared digest.
    pub fn sequence(cfg: &ProvisioningConfig) -> Vec<DiskStep> {
        let mut steps = vec![DiskStep::CheckDiskPresent, DiskStep::FetchOsImage];
        if cfg.os_image.digest.is_some() {
            steps.push(DiskStep::VerifyOsImage);
        }
        steps.extend([
            DiskStep::WriteOsImage,
            DiskStep::NormalizePartitionTable,
            DiskStep::ResizeSecondPartition,
            DiskStep::FilesystemCheck,
            DiskStep::ResizeFilesystem,
        ]);
        steps
    }
}

impl fmt::Display for DiskStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn plan(cfg: &ProvisioningConfig) -> Vec<String> {
    let disk = cfg.devices.disk.display();
    DiskStep::sequence(cfg)
        .into_iter()
        .map(|step| match step {
            DiskStep::FetchOsImage => format!("{} ({})", step, cfg.os_image.url),
            DiskStep::WriteOsImage => format!("{} -> {}", step, disk),
            DiskStep::FilesystemCheck | DiskStep::ResizeFilesystem => {
                format!("{} on {}", step, cfg.devices.root_partition.display())
            }
            _ => step.to_string(),
        })
        .collect()
}

pub struct DiskProvisionStage<'a> {
    cfg: &'a ProvisioningConfig,
    hal: &'a dyn ProvisionHal,
    fetcher: &'a dyn ImageFetcher,
}

impl<'a> DiskProvisionStage<'a> {
    pub fn new(
        armed: &'a ArmedConfig<ProvisioningConfig>,
        hal: &'a dyn ProvisionHal,
        fetcher: &'a dyn ImageFetcher,
    ) -> Self {
        Self {
            cfg: &armed.cfg,
            hal,
            fetcher,
        }
    }

    pub fn run(&self, record: &mut StageRecord) -> StageResult {
        let cfg = self.cfg;
        let hal = self.hal;
        let disk = cfg.devices.disk.as_path();
        let root = cfg.devices.root_partition.as_path();
        let mut steps = Steps::new(STAGE_NAME, DiskStep::sequence(cfg).len(), record);

        steps.step(DiskStep::CheckDiskPresent, || {
            if !hal.device_exists(disk) {
                return Err(ProvisionError::DeviceNotFound {
                    path: disk.to_path_buf(),
                });
            }
            match hal.partition_table(disk) {
                Ok(table) => log::debug!("partition table before install:\n{}", table),
                Err(err) => log::warn!("⚠️ could not list partitions on {}: {}", disk.display(), err),
            }
            Ok(())
        })?;

        let mut image = steps.step(DiskStep::FetchOsImage, || {
            self.fetcher
                .fetch_into(&cfg.os_image.url, &cfg.work_dir, cfg.os_image.digest.clone())
        })?;
        if image.declared.is_some() {
            let verifier = ChecksumVerifier::new(hal);
            steps.step(DiskStep::VerifyOsImage, || image.verify(&verifier))?;
        }

        steps.step(DiskStep::WriteOsImage, || {
            let opts = FlashOptions::new(true);
            let written = match Codec::from_path(&image.path) {
                Some(codec) => hal.write_compressed(&image.path, disk, codec, &opts)?,
                None => hal.write_raw(&image.path, disk, &opts)?,
            };
            log::info!("💾 wrote {} bytes to {}", written, disk.display());
            Ok(())
        })?;

        let parted = PartedOptions::new(true);
        steps.step(DiskStep::NormalizePartitionTable, || {
            Ok(hal.relocate_backup_gpt(disk, &parted)?)
        })?;
        steps.step(DiskStep::ResizeSecondPartition, || {
            let op = PartedOp::ResizePart {
                part_num: ROOT_PARTITION_NUMBER,
                end: "100%".to_string(),
            };
            hal.parted(disk, op, &parted)?;
            Ok(())
        })?;

        let filesystem = |source| ProvisionError::Filesystem {
            device: root.to_path_buf(),
            source,
        };
        steps.step(DiskStep::FilesystemCheck, || {
            hal.check_ext4(root).map_err(filesystem)
        })?;
        steps.step(DiskStep::ResizeFilesystem, || {
            hal.grow_ext4(root).map_err(filesystem)
        })?;

        log::info!("✅ {} provisioned, root on {}", disk.display(), root.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisioningConfigBuilder;
    use crate::fetch::HttpFetcher;
    use crate::stages::test_support::arm;
    use httpmock::prelude::*;
    use rockprov_hal::{FakeHal, Operation};
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use xz2::write::XzEncoder;

    const DISK: &str = "/dev/nvme0n1";

    fn xz(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = XzEncoder::new(Vec::new(), 6);
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn setup(image: &[u8]) -> (MockServer, tempfile::TempDir, ProvisioningConfigBuilder) {
        let server = MockServer::start();
        let body = xz(image);
        server.mock(|when, then| {
            when.method(GET).path("/os.img.xz");
            then.status(200).body(body);
        });
        let work = tempfile::tempdir().unwrap();
        let mut builder = ProvisioningConfigBuilder::default()
            .work_dir(work.path())
            .disk(DISK);
        builder.os_image_url = server.url("/os.img.xz");
        (server, work, builder)
    }

    fn run(builder: ProvisioningConfigBuilder, hal: &FakeHal) -> (StageResult, StageRecord) {
        let armed = arm(builder);
        let fetcher = HttpFetcher::new().unwrap();
        let mut record = StageRecord::new(STAGE_NAME);
        let result = DiskProvisionStage::new(&armed, hal, &fetcher).run(&mut record);
        (result, record)
    }

    #[test]
    fn installs_image_then_grows_root_in_order() {
        let image = b"GPT image payload".repeat(1000);
        let (_server, work, builder) = setup(&image);
        let hal = FakeHal::new();
        hal.add_device(DISK, Vec::new());

        let (result, record) = run(builder, &hal);
        result.unwrap();

        let root = PathBuf::from("/dev/nvme0n1p2");
        assert_eq!(
            hal.operations(),
            vec![
                Operation::PartitionTable { disk: DISK.into() },
                Operation::WriteCompressed {
                    source: work.path().join("os.img.xz"),
                    target: DISK.into(),
                    codec: Codec::Xz,
                },
                Operation::RelocateBackupGpt { disk: DISK.into() },
                Operation::Parted {
                    disk: DISK.into(),
                    op: format!(
                        "{:?}",
                        PartedOp::ResizePart {
                            part_num: 2,
                            end: "100%".into()
                        }
                    ),
                },
                Operation::CheckExt4 {
                    device: root.clone()
                },
                Operation::GrowExt4 { device: root },
            ]
        );
        assert_eq!(hal.device_contents(Path::new(DISK)).unwrap(), image);
        assert!(!record.steps.contains(&"VerifyOsImage".to_string()));
        assert_eq!(record.steps.len(), 7);
    }

    #[test]
    fn missing_disk_halts_without_writing() {
        let (_server, _work, builder) = setup(b"image");
        let hal = FakeHal::new();

        let (result, _) = run(builder, &hal);
        let failure = result.unwrap_err();
        assert_eq!(failure.step, "CheckDiskPresent");
        assert!(matches!(failure.error, ProvisionError::DeviceNotFound { .. }));
        assert!(!hal.has_operation(|op| op.writes_to(Path::new(DISK))));
    }

    #[test]
    fn fsck_failure_is_a_filesystem_error_and_skips_resize() {
        let (_server, _work, builder) = setup(b"image");
        let hal = FakeHal::new();
        hal.add_device(DISK, Vec::new());
        hal.fail_when(|op| matches!(op, Operation::CheckExt4 { .. }));

        let (result, _) = run(builder, &hal);
        let failure = result.unwrap_err();
        assert_eq!(failure.step, "FilesystemCheck");
        assert!(matches!(failure.error, ProvisionError::Filesystem { .. }));
        assert!(!hal.has_operation(|op| matches!(op, Operation::GrowExt4 { .. })));
    }

    #[test]
    fn declared_os_digest_is_verified_before_writing() {
        let (_server, _work, mut builder) = setup(b"image");
        builder.os_image_digest = Some("0".repeat(64));
        let hal = FakeHal::new();
        hal.add_device(DISK, Vec::new());

        let (result, _) = run(builder, &hal);
        let failure = result.unwrap_err();
        assert_eq!(failure.step, "VerifyOsImage");
        assert!(matches!(failure.error, ProvisionError::Integrity { .. }));
        assert!(!hal.has_operation(|op| op.writes_to(Path::new(DISK))));
    }

    #[test]
    fn plan_includes_verify_only_with_digest() {
        let (_server, _work, builder) = setup(b"image");
        let armed = arm(builder);
        assert_eq!(plan(&armed.cfg).len(), 7);

        let (_server, _work, mut builder) = setup(b"image");
        builder.os_image_digest = Some("0".repeat(32));
        let armed = arm(builder);
        let lines = plan(&armed.cfg);
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[2], "VerifyOsImage");
    }
}
