//! Native file copy operations.

use crate::HalResult;
use std::path::Path;

/// Copy operations abstraction.
pub trait CopyOps {
    /// Recursively copy the *contents* of `src` into `dst` (like `cp -a src/. dst/`),
    /// preserving permissions, ownership and symlinks. Returns the number of files copied.
    fn copy_tree(&self, src: &Path, dst: &Path) -> HalResult<u64>;

    /// Copy a single file, returning the number of bytes copied.
    fn copy_file(&self, src: &Path, dst: &Path) -> HalResult<u64>;

    fn remove_file(&self, path: &Path) -> HalResult<()>;
}
