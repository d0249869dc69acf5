//! Orders the enabled stages, runs them and persists the run report.

use crate::config::ProvisioningConfig;
use crate::config_states::{ArmedConfig, ValidatedConfig};
use crate::errors::StageFailure;
use crate::fetch::ImageFetcher;
use crate::report::{RunReport, REPORT_FILE_NAME};
use crate::stage_runner::{StageDefinition, StageRunner};
use crate::stages::{customize, disk, flash, CustomizeStage, DiskProvisionStage, FlashStage};
use rockprov_hal::ProvisionHal;

/// Enabled stage names with their plans, in execution order.
pub fn plan(cfg: &ProvisioningConfig) -> Vec<(&'static str, Vec<String>)> {
    let mut stages = Vec::new();
    if cfg.stages.flash_spi {
        stages.push((flash::STAGE_NAME, flash::plan(cfg)));
    }
    if cfg.stages.install_os {
        stages.push((disk::STAGE_NAME, disk::plan(cfg)));
    }
    if cfg.stages.customize_os {
        stages.push((customize::STAGE_NAME, customize::plan(cfg)));
    }
    stages
}

pub struct ProvisioningPipeline<'a> {
    hal: &'a dyn ProvisionHal,
    fetcher: &'a dyn ImageFetcher,
}

impl<'a> ProvisioningPipeline<'a> {
    pub fn new(hal: &'a dyn ProvisionHal, fetcher: &'a dyn ImageFetcher) -> Self {
        Self { hal, fetcher }
    }

    /// Log what would run. Nothing is fetched and no device is touched.
    pub fn run_dry(&self, cfg: &ValidatedConfig<ProvisioningConfig>) -> RunReport {
        let mut report = RunReport::new(true);
        for (stage, steps) in plan(cfg.inner()) {
            for (idx, step) in steps.iter().enumerate() {
                log::info!("DRY RUN: {} {}/{}: {}", stage, idx + 1, steps.len(), step);
            }
            report.stage_planned(stage, steps);
        }
        report.finish(true);
        report
    }

    /// Run every enabled stage in order, halting at the first failure.
    ///
    /// The report is written to the work dir whether or not the run succeeds.
    pub fn run_armed(
        &self,
        armed: &ArmedConfig<ProvisioningConfig>,
    ) -> Result<RunReport, StageFailure> {
        let cfg = &armed.cfg;
        let stages = self.stage_definitions(armed);
        let mut report = RunReport::new(false);

        let outcome = StageRunner::new().run(&stages, &mut report);
        report.finish(outcome.is_ok());

        let path = cfg.work_dir.join(REPORT_FILE_NAME);
        match report.write_to(&path) {
            Ok(()) => log::info!("📝 run report: {}", path.display()),
            Err(err) => log::warn!("⚠️ could not write run report {}: {:#}", path.display(), err),
        }

        outcome.map(|()| report)
    }

    fn stage_definitions<'s>(
        &'s self,
        armed: &'s ArmedConfig<ProvisioningConfig>,
    ) -> Vec<StageDefinition<'s>> {
        let (hal, fetcher) = (self.hal, self.fetcher);
        let selection = armed.cfg.stages;
        let mut stages = Vec::new();
        if selection.flash_spi {
            let stage = FlashStage::new(armed, hal, fetcher);
            stages.push(StageDefinition {
                name: flash::STAGE_NAME,
                run: Box::new(move |record| stage.run(record)),
            });
        }
        if selection.install_os {
            let stage = DiskProvisionStage::new(armed, hal, fetcher);
            stages.push(StageDefinition {
                name: disk::STAGE_NAME,
                run: Box::new(move |record| stage.run(record)),
            });
        }
        if selection.customize_os {
            let stage = CustomizeStage::new(armed, hal, fetcher);
            stages.push(StageDefinition {
                name: customize::STAGE_NAME,
                run: Box::new(move |record| stage.run(record)),
            });
        }
        stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;
    use crate::config::{ProvisioningConfigBuilder, StageSelection};
    use crate::digest::ExpectedDigest;
    use crate::errors::ProvisionError;
    use crate::report::StageStatus;
    use crate::stages::test_support::arm;
    use rockprov_hal::{FakeHal, Operation};
    use std::path::Path;
    use std::sync::Mutex;

    /// Refuses every download and remembers what was asked for.
    #[derive(Default)]
    struct OfflineFetcher {
        requested: Mutex<Vec<String>>,
    }

    impl ImageFetcher for OfflineFetcher {
        fn fetch(
            &self,
            url: &str,
            _dest: &Path,
            _declared: Option<ExpectedDigest>,
        ) -> Result<Artifact, ProvisionError> {
            self.requested.lock().unwrap().push(url.to_string());
            Err(ProvisionError::Transfer {
                url: url.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    fn builder(work: &Path) -> ProvisioningConfigBuilder {
        ProvisioningConfigBuilder::default()
            .work_dir(work)
            .target_mount(work.join("mnt"))
    }

    #[test]
    fn dry_run_plans_enabled_stages_without_side_effects() {
        let work = tempfile::tempdir().unwrap();
        let cfg = builder(work.path()).dry_run(true).build().unwrap();
        let hal = FakeHal::new();
        let fetcher = OfflineFetcher::default();

        let report = ProvisioningPipeline::new(&hal, &fetcher).run_dry(&cfg);

        assert!(report.success);
        let names: Vec<&str> = report.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["flash", "disk", "customize"]);
        assert!(report.stages.iter().all(|s| s.status == StageStatus::Planned));
        assert_eq!(report.stages[0].steps.len(), 12);
        assert_eq!(hal.operation_count(), 0);
        assert!(fetcher.requested.lock().unwrap().is_empty());
        assert!(!work.path().join(REPORT_FILE_NAME).exists());
    }

    #[test]
    fn failing_stage_halts_later_stages_and_is_reported() {
        let work = tempfile::tempdir().unwrap();
        let armed = arm(builder(work.path()).stages(StageSelection {
            flash_spi: false,
            install_os: true,
            customize_os: true,
        }));
        let hal = FakeHal::new();
        hal.add_device("/dev/nvme0n1", Vec::new());
        let fetcher = OfflineFetcher::default();

        let failure = ProvisioningPipeline::new(&hal, &fetcher)
            .run_armed(&armed)
            .unwrap_err();

        assert_eq!(failure.stage, "disk");
        assert_eq!(failure.step, "FetchOsImage");
        assert!(!hal.has_operation(|op| matches!(op, Operation::Mount { .. })));

        let written = std::fs::read_to_string(work.path().join(REPORT_FILE_NAME)).unwrap();
        let report: RunReport = serde_json::from_str(&written).unwrap();
        assert!(!report.success);
        assert_eq!(report.stages.len(), 1);
        assert_eq!(report.stages[0].failed_step.as_deref(), Some("FetchOsImage"));
        assert_eq!(report.stages[0].error_kind.as_deref(), Some("TransferError"));
    }

    #[test]
    fn customize_only_run_completes_and_writes_report() {
        let work = tempfile::tempdir().unwrap();
        let armed = arm(builder(work.path()).stages(StageSelection {
            flash_spi: false,
            install_os: false,
            customize_os: true,
        }));
        let hal = FakeHal::new();
        let fetcher = OfflineFetcher::default();

        let report = ProvisioningPipeline::new(&hal, &fetcher)
            .run_armed(&armed)
            .unwrap();

        assert!(report.success);
        assert_eq!(report.completed_stages(), vec!["customize"]);
        assert!(work.path().join(REPORT_FILE_NAME).exists());
        assert!(hal.mounted_paths().is_empty());
    }

    #[test]
    fn plan_skips_disabled_stages() {
        let work = tempfile::tempdir().unwrap();
        let cfg = builder(work.path())
            .stages(StageSelection {
                flash_spi: true,
                install_os: false,
                customize_os: false,
            })
            .build()
            .unwrap();
        let stages = plan(cfg.inner());
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].0, "flash");
    }
}
