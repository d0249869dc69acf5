//! System-level operations.

use crate::HalResult;

/// System operations trait.
pub trait SystemOps {
    /// Flush all write caches to physical media.
    fn sync(&self) -> HalResult<()>;
}
