//! Raw read access to files and block devices.

use crate::HalResult;
use std::io::Read;
use std::path::Path;

pub trait BlockReadOps {
    /// Open a file or device node for sequential reading.
    ///
    /// Callers must read in bounded chunks; devices can be far larger than memory.
    fn open_read(&self, path: &Path) -> HalResult<Box<dyn Read + Send>>;
}
