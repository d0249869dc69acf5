use crate::{HalResult, MountOps, MountOptions};
use std::path::{Path, PathBuf};

/// One mount owned by a [`MountSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: PathBuf,
    pub target: PathBuf,
    pub bind: bool,
}

/// RAII guard over an ordered stack of mounts.
///
/// Mounts are released in reverse order of acquisition. `release` reports the first
/// unmount failure; if the set is dropped without `release` (early return, panic),
/// remaining mounts are unmounted best-effort and failures are logged.
#[derive(Debug)]
pub struct MountSet<'a, H: MountOps + ?Sized> {
    hal: &'a H,
    active: Vec<MountEntry>,
}

impl<'a, H: MountOps + ?Sized> MountSet<'a, H> {
    pub fn new(hal: &'a H) -> Self {
        Self {
            hal,
            active: Vec::new(),
        }
    }

    /// Mount a block device and take ownership of the mount.
    pub fn mount(&mut self, device: &Path, target: &Path, fstype: Option<&str>) -> HalResult<()> {
        self.hal
            .mount_device(device, target, fstype, MountOptions::new())?;
        self.active.push(MountEntry {
            source: device.to_path_buf(),
            target: target.to_path_buf(),
            bind: false,
        });
        Ok(())
    }

    /// Bind-mount `source` onto `target` and take ownership of the mount.
    pub fn bind(&mut self, source: &Path, target: &Path) -> HalResult<()> {
        self.hal.bind_mount(source, target)?;
        self.active.push(MountEntry {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            bind: true,
        });
        Ok(())
    }

    /// Unmount a single owned target ahead of the rest (e.g. to reformat its device).
    pub fn unmount_one(&mut self, target: &Path) -> HalResult<()> {
        let Some(idx) = self.active.iter().rposition(|entry| entry.target == target) else {
            return Err(crate::HalError::Other(format!(
                "{} is not owned by this mount set",
                target.display()
            )));
        };
        self.hal.unmount(target)?;
        self.active.remove(idx);
        Ok(())
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.active
    }

    /// Owned mount points, outermost first.
    pub fn targets(&self) -> Vec<PathBuf> {
        self.active.iter().map(|entry| entry.target.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Unmount everything in reverse order, continuing past failures.
    pub fn release(mut self) -> HalResult<()> {
        let mut first_err = None;
        while let Some(entry) = self.active.pop() {
            if let Err(err) = self.hal.unmount(&entry.target) {
                log::warn!("failed to unmount {}: {}", entry.target.display(), err);
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<'a, H: MountOps + ?Sized> Drop for MountSet<'a, H> {
    fn drop(&mut self) {
        while let Some(entry) = self.active.pop() {
            if let Err(err) = self.hal.unmount(&entry.target) {
                log::warn!(
                    "mount guard failed to unmount {}: {}",
                    entry.target.display(),
                    err
                );
            }
        }
    }
}
