//! 🪨 rockprov core library.
//!
//! `rockprov-core` holds the provisioning configuration, integrity checks,
//! image fetching and the three stages (SPI flash, OS install, customization)
//! that `rockprov-installer` drives.

pub mod artifact;
pub mod checksum;
pub mod chroot_script;
pub mod config;
pub mod config_states;
pub mod digest;
pub mod errors;
pub mod fetch;
pub mod logging;
pub mod netplan;
pub mod pipeline;
pub mod preflight;
pub mod report;
pub mod stage_runner;
pub mod stages;

pub use config::{ProvisioningConfig, ProvisioningConfigBuilder};
pub use errors::{ProvisionError, StageFailure, StageResult};
pub use pipeline::ProvisioningPipeline;
