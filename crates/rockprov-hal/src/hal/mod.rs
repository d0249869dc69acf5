//! HAL trait definitions and implementations.
//!
//! This module defines the core traits for system operations and provides
//! both real (LinuxHal) and fake (FakeHal) implementations.

pub mod copy_ops;
pub mod fake_hal;
pub mod flash_ops;
pub mod format_ops;
pub mod guards;
pub mod linux_hal;
pub mod mount_ops;
pub mod partition_ops;
pub mod probe_ops;
pub mod process_ops;
pub mod read_ops;
pub mod system_ops;

pub use copy_ops::CopyOps;
pub use fake_hal::{FakeHal, Operation};
pub use flash_ops::{Codec, FlashOps, FlashOptions};
pub use format_ops::{FormatOps, FormatOptions};
pub use guards::{MountEntry, MountSet};
pub use linux_hal::LinuxHal;
pub use mount_ops::{MountOps, MountOptions};
pub use partition_ops::{PartedOp, PartedOptions, PartitionOps};
pub use probe_ops::ProbeOps;
pub use process_ops::ProcessOps;
pub use read_ops::BlockReadOps;
pub use system_ops::SystemOps;

/// Complete HAL combining all system operation traits used by the provisioning stages.
pub trait ProvisionHal:
    ProcessOps
    + FlashOps
    + BlockReadOps
    + MountOps
    + FormatOps
    + PartitionOps
    + SystemOps
    + ProbeOps
    + CopyOps
    + Send
    + Sync
{
}

/// Automatically implement ProvisionHal for any type implementing all required traits.
impl<T> ProvisionHal for T where
    T: ProcessOps
        + FlashOps
        + BlockReadOps
        + MountOps
        + FormatOps
        + PartitionOps
        + SystemOps
        + ProbeOps
        + CopyOps
        + Send
        + Sync
{
}
