//! rockprov hardware abstraction layer (HAL).
//!
//! Every primitive that touches the host (spawning tools, writing block devices,
//! mounting, formatting) lives behind the traits in [`hal`], so provisioning
//! stages can be driven against [`FakeHal`] in CI without root or hardware.

pub mod error;
pub mod hal;
pub mod path;
pub mod procfs;

pub use error::{HalError, HalResult};
pub use hal::{
    BlockReadOps, Codec, CopyOps, FakeHal, FlashOptions, FlashOps, FormatOps, FormatOptions,
    LinuxHal, MountEntry, MountOps, MountOptions, MountSet, Operation, PartedOp, PartedOptions,
    PartitionOps, ProbeOps, ProcessOps, ProvisionHal, SystemOps,
};
pub use path::partition_path;
