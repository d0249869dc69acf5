//! Device probing operations.

use crate::HalResult;
use std::path::Path;

/// Probing operations trait.
pub trait ProbeOps {
    /// Whether the device node (or file) at `path` exists.
    fn device_exists(&self, path: &Path) -> bool;

    /// Human-readable partition table listing (`fdisk -l`) for diagnostics.
    fn partition_table(&self, disk: &Path) -> HalResult<String>;
}
