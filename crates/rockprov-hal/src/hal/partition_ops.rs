//! Partition table operations (sgdisk/parted).

use crate::HalResult;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PartedOptions {
    pub confirmed: bool,
}

impl PartedOptions {
    pub fn new(confirmed: bool) -> Self {
        Self { confirmed }
    }
}

/// A single partition operation executed via `parted --script`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartedOp {
    /// Move the end of partition `part_num` to `end` (e.g. `"100%"`).
    ResizePart { part_num: u32, end: String },
    Print,
}

pub trait PartitionOps {
    /// Move the GPT backup header to the real end of the disk.
    ///
    /// Images built for a smaller reference disk leave the backup header mid-disk,
    /// which hides the remaining space from partitioning tools.
    fn relocate_backup_gpt(&self, disk: &Path, opts: &PartedOptions) -> HalResult<()>;

    /// Execute a single `parted` operation on the given disk.
    fn parted(&self, disk: &Path, op: PartedOp, opts: &PartedOptions) -> HalResult<String>;
}
