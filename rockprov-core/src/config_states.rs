//! TypeState helpers for provisioning configs (validation -> arming).
//!
//! This encodes safety invariants in types so destructive operations can only be invoked once a
//! config is validated and explicitly armed.

use crate::errors::ProvisionError;

#[derive(Debug, Clone, Copy)]
pub struct ExecuteArmToken(());

impl ExecuteArmToken {
    /// Only an explicit `--yes` arms destructive execution.
    pub fn try_new(yes: bool) -> Result<Self, ProvisionError> {
        if !yes {
            return Err(ProvisionError::MissingYes);
        }
        Ok(Self(()))
    }
}

pub trait ValidateConfig {
    fn validate_cfg(&self) -> Result<(), ProvisionError>;
}

pub trait HasRunMode {
    fn is_dry_run(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct UnvalidatedConfig<T>(pub T);

#[derive(Debug, Clone)]
pub struct ValidatedConfig<T>(pub T);

#[derive(Debug, Clone)]
pub struct ArmedConfig<T> {
    pub cfg: T,
    pub token: ExecuteArmToken,
}

impl<T> UnvalidatedConfig<T> {
    pub fn new(cfg: T) -> Self {
        Self(cfg)
    }
}

impl<T: ValidateConfig> UnvalidatedConfig<T> {
    pub fn validate(self) -> Result<ValidatedConfig<T>, ProvisionError> {
        self.0.validate_cfg()?;
        Ok(ValidatedConfig(self.0))
    }
}

impl<T> ValidatedConfig<T> {
    pub fn inner(&self) -> &T {
        &self.0
    }
}

impl<T: HasRunMode> ValidatedConfig<T> {
    pub fn require_dry_run(&self) -> Result<(), ProvisionError> {
        if !self.0.is_dry_run() {
            return Err(ProvisionError::Config(
                "expected dry-run config".to_string(),
            ));
        }
        Ok(())
    }

    pub fn arm_execute(self, token: ExecuteArmToken) -> Result<ArmedConfig<T>, ProvisionError> {
        if self.0.is_dry_run() {
            return Err(ProvisionError::Config(
                "cannot arm an execute token for a dry-run config".to_string(),
            ));
        }
        Ok(ArmedConfig { cfg: self.0, token })
    }
}
