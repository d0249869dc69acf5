//! The three provisioning stages.
//!
//! Each stage exposes a step enum, a `plan()` for dry runs and a stage struct
//! that can only be built from an armed config.

pub mod customize;
pub mod disk;
pub mod flash;

use crate::errors::{ProvisionError, StageFailure};
use crate::report::StageRecord;
use std::fmt;

pub use customize::{CustomizeStage, CustomizeStep};
pub use disk::{DiskProvisionStage, DiskStep};
pub use flash::{FlashStage, FlashStep};

/// Walks a stage's steps in order, logging each start and recording completions.
pub(crate) struct Steps<'r> {
    stage: &'static str,
    total: usize,
    current: usize,
    record: &'r mut StageRecord,
}

impl<'r> Steps<'r> {
    pub(crate) fn new(stage: &'static str, total: usize, record: &'r mut StageRecord) -> Self {
        Self {
            stage,
            total,
            current: 0,
            record,
        }
    }

    /// Run one step; a failure is tagged with the stage and step name.
    pub(crate) fn step<S, T, F>(&mut self, step: S, f: F) -> Result<T, StageFailure>
    where
        S: fmt::Display,
        F: FnOnce() -> Result<T, ProvisionError>,
    {
        self.current += 1;
        log::info!("[{} {}/{}] {}", self.stage, self.current, self.total, step);
        match f() {
            Ok(value) => {
                self.record.step_completed(&step);
                Ok(value)
            }
            Err(error) => Err(StageFailure::new(self.stage, step, error)),
        }
    }
}

/// Dry-run plan lines for a list of steps.
pub(crate) fn plan_lines<S: fmt::Display>(steps: impl IntoIterator<Item = S>) -> Vec<String> {
    steps.into_iter().map(|step| step.to_string()).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::{ProvisioningConfig, ProvisioningConfigBuilder};
    use crate::config_states::{ArmedConfig, ExecuteArmToken};

    /// Arm a builder the way the CLI does after `--yes`.
    pub fn arm(builder: ProvisioningConfigBuilder) -> ArmedConfig<ProvisioningConfig> {
        let token = ExecuteArmToken::try_new(true).unwrap();
        builder.build().unwrap().arm_execute(token).unwrap()
    }
}
