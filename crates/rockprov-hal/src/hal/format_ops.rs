//! Filesystem formatting, checking and resizing.

use crate::HalResult;
use std::path::Path;

/// Trait for ext4 filesystem maintenance on block devices.
pub trait FormatOps {
    /// Format a device with an ext4 filesystem (`mkfs.ext4 -F`).
    fn format_ext4(&self, device: &Path, opts: &FormatOptions) -> HalResult<()>;

    /// Forced consistency check (`e2fsck -f -p`). Exit codes 0 and 1 (errors corrected)
    /// count as success; anything else is a filesystem error.
    fn check_ext4(&self, device: &Path) -> HalResult<()>;

    /// Grow an ext4 filesystem to fill its partition (`resize2fs`).
    fn grow_ext4(&self, device: &Path) -> HalResult<()>;
}

/// Options for formatting operations.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// If true, the operator has confirmed the destructive operation
    pub confirmed: bool,
}

impl FormatOptions {
    pub fn new(confirmed: bool) -> Self {
        Self { confirmed }
    }
}
