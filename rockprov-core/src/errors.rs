use rockprov_hal::HalError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a provisioning step could not complete.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("transfer of {url} failed: {reason}")]
    Transfer { url: String, reason: String },

    #[error("integrity check failed for {subject}: expected {expected}, got {actual}")]
    Integrity {
        subject: String,
        expected: String,
        actual: String,
    },

    #[error("device not found: {}", path.display())]
    DeviceNotFound { path: PathBuf },

    #[error("external tool failed: {0}")]
    ExternalTool(#[source] HalError),

    #[error("filesystem error on {}: {source}", device.display())]
    Filesystem {
        device: PathBuf,
        #[source]
        source: HalError,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("Missing --yes flag. This operation is destructive!")]
    MissingYes,
}

impl ProvisionError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Short category name, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transfer { .. } => "TransferError",
            Self::Integrity { .. } => "IntegrityError",
            Self::DeviceNotFound { .. } => "DeviceNotFound",
            Self::ExternalTool(_) => "ExternalToolError",
            Self::Filesystem { .. } => "FilesystemError",
            Self::Io { .. } => "IoError",
            Self::Config(_) | Self::MissingYes => "ConfigError",
        }
    }
}

impl From<HalError> for ProvisionError {
    fn from(err: HalError) -> Self {
        Self::ExternalTool(err)
    }
}

/// A stage halted at a named step.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: &'static str,
    pub step: String,
    pub error: ProvisionError,
}

impl StageFailure {
    pub fn new(stage: &'static str, step: impl fmt::Display, error: ProvisionError) -> Self {
        Self {
            stage,
            step: step.to_string(),
            error,
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage {} halted at step {}: {}",
            self.stage, self.step, self.error
        )
    }
}

impl std::error::Error for StageFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub type StageResult = Result<(), StageFailure>;
