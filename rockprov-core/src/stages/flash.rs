//! SPI flash: zero-fill then bootloader, each verified before and after writing.

use super::{plan_lines, Steps};
use crate::artifact::Artifact;
use crate::checksum::ChecksumVerifier;
use crate::config::ProvisioningConfig;
use crate::config_states::ArmedConfig;
use crate::digest::ExpectedDigest;
use crate::errors::{ProvisionError, StageResult};
use crate::fetch::ImageFetcher;
use crate::report::StageRecord;
use rockprov_hal::{Codec, FlashOptions, ProvisionHal};
use std::fmt;
use std::path::Path;

pub const STAGE_NAME: &str = "flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStep {
    FetchZeroFill,
    VerifyZeroFillCompressed,
    Decompress,
    VerifyZeroFillRaw,
    FetchBootloader,
    VerifyBootloader,
    CheckFlashDevicePresent,
    WriteZeroFill,
    VerifyFlashAfterZeroFill,
    WriteBootloader,
    Sync,
    VerifyFlashAfterBootloader,
}

impl FlashStep {
    pub const ALL: [FlashStep; 12] = [
        FlashStep::FetchZeroFill,
        FlashStep::VerifyZeroFillCompressed,
        FlashStep::Decompress,
        FlashStep::VerifyZeroFillRaw,
        FlashStep::FetchBootloader,
        FlashStep::VerifyBootloader,
        FlashStep::CheckFlashDevicePresent,
        FlashStep::WriteZeroFill,
        FlashStep::VerifyFlashAfterZeroFill,
        FlashStep::WriteBootloader,
        FlashStep::Sync,
        FlashStep::VerifyFlashAfterBootloader,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FlashStep::FetchZeroFill => "FetchZeroFill",
            FlashStep::VerifyZeroFillCompressed => "VerifyZeroFillCompressed",
            FlashStep::Decompress => "Decompress",
            FlashStep::VerifyZeroFillRaw => "VerifyZeroFillRaw",
            FlashStep::FetchBootloader => "FetchBootloader",
            FlashStep::VerifyBootloader => "VerifyBootloader",
            FlashStep::CheckFlashDevicePresent => "CheckFlashDevicePresent",
            FlashStep::WriteZeroFill => "WriteZeroFill",
            FlashStep::VerifyFlashAfterZeroFill => "VerifyFlashAfterZeroFill",
            FlashStep::WriteBootloader => "WriteBootloader",
            FlashStep::Sync => "Sync",
            FlashStep::VerifyFlashAfterBootloader => "VerifyFlashAfterBootloader",
        }
    }
}

impl fmt::Display for FlashStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn plan(cfg: &ProvisioningConfig) -> Vec<String> {
    let mut lines = plan_lines(FlashStep::ALL);
    lines[0] = format!("{} ({})", FlashStep::FetchZeroFill, cfg.zero_fill.url);
    lines[4] = format!("{} ({})", FlashStep::FetchBootloader, cfg.bootloader.url);
    lines[7] = format!(
        "{} -> {}",
        FlashStep::WriteZeroFill,
        cfg.devices.flash_device.display()
    );
    lines
}

pub struct FlashStage<'a> {
    cfg: &'a ProvisioningConfig,
    hal: &'a dyn ProvisionHal,
    fetcher: &'a dyn ImageFetcher,
}

impl<'a> FlashStage<'a> {
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
        let verifier = ChecksumVerifier::new(hal);
        let device = cfg.devices.flash_device.as_path();
        let zero = &cfg.zero_fill;
        let mut steps = Steps::new(STAGE_NAME, FlashStep::ALL.len(), record);

        let mut compressed = steps.step(FlashStep::FetchZeroFill, || {
            self.fetcher
                .fetch_into(&zero.url, &cfg.work_dir, Some(zero.compressed_digest.clone()))
        })?;
        steps.step(FlashStep::VerifyZeroFillCompressed, || {
            compressed.verify(&verifier)
        })?;

        let mut raw = steps.step(FlashStep::Decompress, || {
            let codec = Codec::from_path(&compressed.path).ok_or_else(|| {
                ProvisionError::Config(format!(
                    "no known compression for {}",
                    compressed.path.display()
                ))
            })?;
            let dest = codec.decompressed_path(&compressed.path);
            let bytes = hal.decompress_file(&compressed.path, &dest, codec)?;
            hal.remove_file(&compressed.path)?;
            log::info!("📦 {} ({} bytes)", dest.display(), bytes);
            Ok(Artifact::new(dest, Some(zero.raw_digest.clone())))
        })?;
        steps.step(FlashStep::VerifyZeroFillRaw, || raw.verify(&verifier))?;

        let mut loader = steps.step(FlashStep::FetchBootloader, || {
            self.fetcher.fetch_into(
                &cfg.bootloader.url,
                &cfg.work_dir,
                Some(cfg.bootloader.digest.clone()),
            )
        })?;
        steps.step(FlashStep::VerifyBootloader, || loader.verify(&verifier))?;

        steps.step(FlashStep::CheckFlashDevicePresent, || {
            if hal.device_exists(device) {
                Ok(())
            } else {
                Err(ProvisionError::DeviceNotFound {
                    path: device.to_path_buf(),
                })
            }
        })?;

        let opts = FlashOptions::new(true);
        let zero_len = steps.step(FlashStep::WriteZeroFill, || {
            Ok(hal.write_raw(&raw.path, device, &opts)?)
        })?;
        steps.step(FlashStep::VerifyFlashAfterZeroFill, || {
            verify_device(&verifier, device, zero_len, &zero.raw_digest, "zero-fill")
        })?;

        let loader_len = steps.step(FlashStep::WriteBootloader, || {
            Ok(hal.write_raw(&loader.path, device, &opts)?)
        })?;
        steps.step(FlashStep::Sync, || Ok(hal.sync()?))?;
        steps.step(FlashStep::VerifyFlashAfterBootloader, || {
            verify_device(
                &verifier,
                device,
                loader_len,
                &cfg.bootloader.digest,
                "bootloader",
            )
        })?;

        log::info!("💾 SPI flash of {} verified", device.display());
        Ok(())
    }
}

/// Compare the first `len` bytes of the device against the image digest.
fn verify_device(
    verifier: &ChecksumVerifier<'_, dyn ProvisionHal + '_>,
    device: &Path,
    len: u64,
    expected: &ExpectedDigest,
    image: &str,
) -> Result<(), ProvisionError> {
    let actual = verifier.digest_prefix(device, expected.algorithm(), len)?;
    log::info!(
        "🔎 {} after {} write: expected {}, actual {}",
        device.display(),
        image,
        expected.hex(),
        actual
    );
    if !verifier.verify(&actual, expected.hex()) {
        return Err(ProvisionError::Integrity {
            subject: format!("{} after {} write", device.display(), image),
            expected: expected.hex().to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisioningConfigBuilder;
    use crate::digest::DigestAlgorithm;
    use crate::fetch::HttpFetcher;
    use crate::stages::test_support::arm;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use httpmock::prelude::*;
    use rockprov_hal::{FakeHal, Operation};
    use std::io::Write;
    use std::path::PathBuf;

    const DEVICE: &str = "/dev/mtdblock0";

    fn md5(bytes: &[u8]) -> String {
        let mut hasher = DigestAlgorithm::Md5.hasher();
        hasher.update(bytes);
        hasher.finalize_hex()
    }

    struct Fixture {
        server: MockServer,
        work: tempfile::TempDir,
        zero_gz: Vec<u8>,
        zero_raw: Vec<u8>,
        loader: Vec<u8>,
    }

    impl Fixture {
        fn new() -> Self {
            let zero_raw = vec![0u8; 96 * 1024];
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&zero_raw).unwrap();
            let zero_gz = encoder.finish().unwrap();
            let loader: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();

            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/zero.img.gz");
                then.status(200).body(zero_gz.clone());
            });
            server.mock(|when, then| {
                when.method(GET).path("/rock-5b-spi-image.img");
                then.status(200).body(loader.clone());
            });

            Self {
                server,
                work: tempfile::tempdir().unwrap(),
                zero_gz,
                zero_raw,
                loader,
            }
        }

        fn builder(&self) -> ProvisioningConfigBuilder {
            let mut builder = ProvisioningConfigBuilder::default()
                .work_dir(self.work.path())
                .flash_device(DEVICE);
            builder.zero_fill_url = self.server.url("/zero.img.gz");
            builder.zero_fill_digest = md5(&self.zero_gz);
            builder.zero_fill_raw_digest = md5(&self.zero_raw);
            builder.bootloader_url = self.server.url("/rock-5b-spi-image.img");
            builder.bootloader_digest = md5(&self.loader);
            builder
        }

        fn hal_with_device(&self) -> FakeHal {
            let hal = FakeHal::new();
            hal.add_device(DEVICE, vec![0xAA; 128 * 1024]);
            hal
        }
    }

    fn run(builder: ProvisioningConfigBuilder, hal: &FakeHal) -> (StageResult, StageRecord) {
        let armed = arm(builder);
        let fetcher = HttpFetcher::new().unwrap();
        let mut record = StageRecord::new(STAGE_NAME);
        let result = FlashStage::new(&armed, hal, &fetcher).run(&mut record);
        (result, record)
    }

    fn device_writes(hal: &FakeHal) -> Vec<PathBuf> {
        hal.operations()
            .into_iter()
            .filter_map(|op| match op {
                Operation::WriteRaw { source, .. } => Some(source),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn matching_digests_flash_and_verify_both_images() {
        let fx = Fixture::new();
        let hal = fx.hal_with_device();

        let (result, record) = run(fx.builder(), &hal);
        result.unwrap();

        assert_eq!(record.steps.len(), 12);
        assert_eq!(record.steps[11], "VerifyFlashAfterBootloader");
        let contents = hal.device_contents(Path::new(DEVICE)).unwrap();
        assert_eq!(&contents[..fx.loader.len()], fx.loader.as_slice());

        let writes = device_writes(&hal);
        assert_eq!(
            writes,
            vec![
                fx.work.path().join("zero.img"),
                fx.work.path().join("rock-5b-spi-image.img"),
            ]
        );
        let sync_idx = hal
            .operations()
            .iter()
            .position(|op| *op == Operation::Sync)
            .unwrap();
        assert_eq!(sync_idx, hal.operation_count() - 1);
    }

    #[test]
    fn each_wrong_digest_halts_at_its_own_step() {
        let cases: [(fn(&mut ProvisioningConfigBuilder), FlashStep); 3] = [
            (
                |b| b.zero_fill_digest = "00000000000000000000000000000000".into(),
                FlashStep::VerifyZeroFillCompressed,
            ),
            (
                |b| b.zero_fill_raw_digest = "00000000000000000000000000000000".into(),
                FlashStep::VerifyZeroFillRaw,
            ),
            (
                |b| b.bootloader_digest = "00000000000000000000000000000000".into(),
                FlashStep::VerifyBootloader,
            ),
        ];

        for (tweak, expected_step) in cases {
            let fx = Fixture::new();
            let hal = fx.hal_with_device();
            let mut builder = fx.builder();
            tweak(&mut builder);

            let (result, _) = run(builder, &hal);
            let failure = result.unwrap_err();
            assert_eq!(failure.step, expected_step.name());
            assert!(matches!(failure.error, ProvisionError::Integrity { .. }));
            assert!(
                device_writes(&hal).is_empty(),
                "{} must halt before touching the device",
                expected_step
            );
        }
    }

    #[test]
    fn missing_flash_device_is_reported_before_any_write() {
        let fx = Fixture::new();
        let hal = FakeHal::new();

        let (result, _) = run(fx.builder(), &hal);
        let failure = result.unwrap_err();
        assert_eq!(failure.step, "CheckFlashDevicePresent");
        match failure.error {
            ProvisionError::DeviceNotFound { path } => assert_eq!(path, PathBuf::from(DEVICE)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(device_writes(&hal).is_empty());
    }

    #[test]
    fn unreliable_zero_fill_write_blocks_bootloader() {
        let fx = Fixture::new();
        let hal = fx.hal_with_device();
        hal.corrupt_writes_to(DEVICE);

        let (result, record) = run(fx.builder(), &hal);
        let failure = result.unwrap_err();
        assert_eq!(failure.step, "VerifyFlashAfterZeroFill");
        assert!(matches!(failure.error, ProvisionError::Integrity { .. }));
        assert_eq!(device_writes(&hal).len(), 1);
        assert_eq!(record.steps.last().map(String::as_str), Some("WriteZeroFill"));
    }

    #[test]
    fn corrupted_bootloader_write_fails_final_verification() {
        let fx = Fixture::new();
        let hal = fx.hal_with_device();
        hal.corrupt_nth_write_to(DEVICE, 2);

        let (result, record) = run(fx.builder(), &hal);
        let failure = result.unwrap_err();
        assert_eq!(failure.step, "VerifyFlashAfterBootloader");
        assert!(matches!(failure.error, ProvisionError::Integrity { .. }));
        assert_eq!(device_writes(&hal).len(), 2);
        assert_eq!(record.steps.len(), 11);
        assert_eq!(record.steps.last().map(String::as_str), Some("Sync"));
    }

    #[test]
    fn failed_download_is_a_transfer_error() {
        let fx = Fixture::new();
        let hal = fx.hal_with_device();
        let mut builder = fx.builder();
        builder.zero_fill_url = fx.server.url("/missing.img.gz");

        let (result, _) = run(builder, &hal);
        let failure = result.unwrap_err();
        assert_eq!(failure.step, "FetchZeroFill");
        assert!(matches!(failure.error, ProvisionError::Transfer { .. }));
    }

    #[test]
    fn plan_lists_twelve_steps_with_targets() {
        let fx = Fixture::new();
        let armed = arm(fx.builder());
        let lines = plan(&armed.cfg);
        assert_eq!(lines.len(), 12);
        assert!(lines[0].contains("zero.img.gz"));
        assert!(lines[7].ends_with(DEVICE));
        assert_eq!(lines[11], "VerifyFlashAfterBootloader");
    }
}
