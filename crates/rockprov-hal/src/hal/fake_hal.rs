//! Fake HAL implementation for testing.
//!
//! This implementation records all operations without executing them,
//! allowing for CI-safe testing without root privileges or real hardware.
//! Block devices are modelled as in-memory byte buffers so write-then-verify
//! workflows can be exercised end to end.

use super::flash_ops::decompress_to_file;
use super::{
    BlockReadOps, Codec, CopyOps, FlashOps, FlashOptions, FormatOps, FormatOptions, MountOps,
    MountOptions, PartedOp, PartedOptions, PartitionOps, ProbeOps, ProcessOps, SystemOps,
};
use crate::{HalError, HalResult};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{self, Cursor, Read};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Mount {
        device: PathBuf,
        target: PathBuf,
        fstype: Option<String>,
    },
    BindMount {
        source: PathBuf,
        target: PathBuf,
    },
    Unmount {
        target: PathBuf,
    },
    FormatExt4 {
        device: PathBuf,
    },
    CheckExt4 {
        device: PathBuf,
    },
    GrowExt4 {
        device: PathBuf,
    },
    WriteRaw {
        source: PathBuf,
        target: PathBuf,
    },
    WriteCompressed {
        source: PathBuf,
        target: PathBuf,
        codec: Codec,
    },
    Decompress {
        source: PathBuf,
        dest: PathBuf,
        codec: Codec,
    },
    Sync,
    RelocateBackupGpt {
        disk: PathBuf,
    },
    Parted {
        disk: PathBuf,
        op: String,
    },
    PartitionTable {
        disk: PathBuf,
    },
    CopyTree {
        src: PathBuf,
        dst: PathBuf,
    },
    CopyFile {
        src: PathBuf,
        dst: PathBuf,
    },
    RemoveFile {
        path: PathBuf,
    },
    Command {
        program: String,
        args: Vec<String>,
        stdin: Option<String>,
        timeout_secs: u64,
    },
}

impl Operation {
    /// Name of the tool the real HAL would run for this operation.
    pub fn program(&self) -> String {
        match self {
            Self::Mount { .. } | Self::BindMount { .. } => "mount".into(),
            Self::Unmount { .. } => "umount".into(),
            Self::FormatExt4 { .. } => "mkfs.ext4".into(),
            Self::CheckExt4 { .. } => "e2fsck".into(),
            Self::GrowExt4 { .. } => "resize2fs".into(),
            Self::WriteRaw { .. } | Self::WriteCompressed { .. } => "dd".into(),
            Self::Decompress { codec, .. } => match codec {
                Codec::Gzip => "gzip".into(),
                Codec::Xz => "xz".into(),
            },
            Self::Sync => "sync".into(),
            Self::RelocateBackupGpt { .. } => "sgdisk".into(),
            Self::Parted { .. } => "parted".into(),
            Self::PartitionTable { .. } => "fdisk".into(),
            Self::CopyTree { .. } | Self::CopyFile { .. } => "cp".into(),
            Self::RemoveFile { .. } => "rm".into(),
            Self::Command { program, .. } => program.clone(),
        }
    }

    /// True for operations that write to `target` as a device.
    pub fn writes_to(&self, device: &Path) -> bool {
        match self {
            Self::WriteRaw { target, .. } | Self::WriteCompressed { target, .. } => {
                target == device
            }
            _ => false,
        }
    }
}

type FailureRule = Box<dyn Fn(&Operation) -> bool + Send>;

/// Shared state for FakeHal operations.
#[derive(Default)]
struct FakeHalState {
    /// All operations that were recorded
    operations: Vec<Operation>,
    /// Currently mounted paths, in mount order
    mounted_paths: Vec<PathBuf>,
    /// Simulated device contents
    devices: HashMap<PathBuf, Vec<u8>>,
    /// Devices whose writes get a flipped first byte
    corrupt: HashSet<PathBuf>,
    /// Devices whose Nth write (1-based) gets a flipped first byte
    corrupt_nth: HashMap<PathBuf, usize>,
    write_counts: HashMap<PathBuf, usize>,
    failure_rules: Vec<FailureRule>,
}

impl fmt::Debug for FakeHalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeHalState")
            .field("operations", &self.operations)
            .field("mounted_paths", &self.mounted_paths)
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .field("corrupt", &self.corrupt)
            .field("corrupt_nth", &self.corrupt_nth)
            .field("failure_rules", &self.failure_rules.len())
            .finish()
    }
}

/// Fake HAL implementation that records operations without executing them.
///
/// This is designed for testing and CI environments where real system
/// operations would fail or be dangerous. Local file transforms
/// (`decompress_file`) and reads of non-device paths do touch the real filesystem,
/// so tests should point them at a temp dir.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeHalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a simulated block device with initial contents.
    pub fn add_device(&self, path: impl Into<PathBuf>, contents: Vec<u8>) {
        self.state().devices.insert(path.into(), contents);
    }

    pub fn device_contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.state().devices.get(path).cloned()
    }

    /// Every subsequent write to `path` lands with its first byte flipped.
    pub fn corrupt_writes_to(&self, path: impl Into<PathBuf>) {
        self.state().corrupt.insert(path.into());
    }

    /// Only the `n`th write (counting from 1) to `path` lands corrupted.
    pub fn corrupt_nth_write_to(&self, path: impl Into<PathBuf>, n: usize) {
        self.state().corrupt_nth.insert(path.into(), n);
    }

    /// Make every operation matching `rule` fail after being recorded.
    pub fn fail_when(&self, rule: impl Fn(&Operation) -> bool + Send + 'static) {
        self.state().failure_rules.push(Box::new(rule));
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state().operations.clone()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.state().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state().operations.iter().any(check)
    }

    /// Currently mounted paths, in mount order.
    pub fn mounted_paths(&self) -> Vec<PathBuf> {
        self.state().mounted_paths.clone()
    }

    /// Clear all recorded operations.
    pub fn clear(&self) {
        let mut state = self.state();
        state.operations.clear();
        state.mounted_paths.clear();
    }

    fn record_operation(&self, op: Operation) -> HalResult<()> {
        let mut state = self.state();
        let fail = state.failure_rules.iter().any(|rule| rule(&op));
        let program = op.program();
        state.operations.push(op);
        if fail {
            return Err(HalError::CommandFailed {
                program,
                code: Some(1),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn store_device_bytes(&self, target: &Path, bytes: &[u8]) -> HalResult<u64> {
        let mut state = self.state();
        let count = {
            let count = state.write_counts.entry(target.to_path_buf()).or_insert(0);
            *count += 1;
            *count
        };
        let corrupt =
            state.corrupt.contains(target) || state.corrupt_nth.get(target) == Some(&count);
        let Some(device) = state.devices.get_mut(target) else {
            return Err(HalError::DeviceWrite {
                target: target.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
            });
        };
        if device.len() < bytes.len() {
            device.resize(bytes.len(), 0);
        }
        device[..bytes.len()].copy_from_slice(bytes);
        if corrupt && !bytes.is_empty() {
            device[0] ^= 0xFF;
        }
        Ok(bytes.len() as u64)
    }
}

impl ProcessOps for FakeHal {
    fn command_output(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<Output> {
        self.command_status_with_stdin(program, args, None, timeout)?;
        Ok(Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }

    fn command_status_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> HalResult<()> {
        log::info!("FAKE HAL: {} {}", program, args.join(" "));
        self.record_operation(Operation::Command {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            stdin: stdin.map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl FlashOps for FakeHal {
    fn write_raw(&self, source: &Path, target: &Path, opts: &FlashOptions) -> HalResult<u64> {
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        log::info!("FAKE HAL: dd {} -> {}", source.display(), target.display());
        self.record_operation(Operation::WriteRaw {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
        })?;
        let bytes = std::fs::read(source)?;
        self.store_device_bytes(target, &bytes)
    }

    fn write_compressed(
        &self,
        source: &Path,
        target: &Path,
        codec: Codec,
        opts: &FlashOptions,
    ) -> HalResult<u64> {
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        log::info!(
            "FAKE HAL: {:?} stream {} -> {}",
            codec,
            source.display(),
            target.display()
        );
        self.record_operation(Operation::WriteCompressed {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            codec,
        })?;
        let input = std::fs::File::open(source)?;
        let mut bytes = Vec::new();
        codec
            .decoder(input)
            .read_to_end(&mut bytes)
            .map_err(|err| HalError::Decompress {
                path: source.to_path_buf(),
                source: err,
            })?;
        self.store_device_bytes(target, &bytes)
    }

    fn decompress_file(&self, source: &Path, dest: &Path, codec: Codec) -> HalResult<u64> {
        self.record_operation(Operation::Decompress {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            codec,
        })?;
        decompress_to_file(source, dest, codec)
    }
}

impl BlockReadOps for FakeHal {
    fn open_read(&self, path: &Path) -> HalResult<Box<dyn Read + Send>> {
        if let Some(bytes) = self.state().devices.get(path) {
            return Ok(Box::new(Cursor::new(bytes.clone())));
        }
        Ok(Box::new(std::fs::File::open(path)?))
    }
}

impl MountOps for FakeHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        _options: MountOptions,
    ) -> HalResult<()> {
        log::info!(
            "FAKE HAL: mount {} -> {} (type: {:?})",
            device.display(),
            target.display(),
            fstype
        );
        self.record_operation(Operation::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fstype: fstype.map(String::from),
        })?;
        self.state().mounted_paths.push(target.to_path_buf());
        Ok(())
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> HalResult<()> {
        log::info!(
            "FAKE HAL: mount --bind {} -> {}",
            source.display(),
            target.display()
        );
        self.record_operation(Operation::BindMount {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
        })?;
        self.state().mounted_paths.push(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> HalResult<()> {
        log::info!("FAKE HAL: unmount {}", target.display());
        self.record_operation(Operation::Unmount {
            target: target.to_path_buf(),
        })?;
        let mut state = self.state();
        let Some(idx) = state.mounted_paths.iter().rposition(|p| p == target) else {
            return Err(HalError::Other(format!(
                "{} is not mounted",
                target.display()
            )));
        };
        state.mounted_paths.remove(idx);
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        Ok(self.state().mounted_paths.iter().any(|p| p == path))
    }
}

impl FormatOps for FakeHal {
    fn format_ext4(&self, device: &Path, opts: &FormatOptions) -> HalResult<()> {
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        log::info!("FAKE HAL: mkfs.ext4 {}", device.display());
        self.record_operation(Operation::FormatExt4 {
            device: device.to_path_buf(),
        })
    }

    fn check_ext4(&self, device: &Path) -> HalResult<()> {
        self.record_operation(Operation::CheckExt4 {
            device: device.to_path_buf(),
        })
    }

    fn grow_ext4(&self, device: &Path) -> HalResult<()> {
        self.record_operation(Operation::GrowExt4 {
            device: device.to_path_buf(),
        })
    }
}

impl PartitionOps for FakeHal {
    fn relocate_backup_gpt(&self, disk: &Path, opts: &PartedOptions) -> HalResult<()> {
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        self.record_operation(Operation::RelocateBackupGpt {
            disk: disk.to_path_buf(),
        })
    }

    fn parted(&self, disk: &Path, op: PartedOp, opts: &PartedOptions) -> HalResult<String> {
        if !matches!(op, PartedOp::Print) && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        self.record_operation(Operation::Parted {
            disk: disk.to_path_buf(),
            op: format!("{:?}", op),
        })?;
        Ok(String::new())
    }
}

impl SystemOps for FakeHal {
    fn sync(&self) -> HalResult<()> {
        self.record_operation(Operation::Sync)
    }
}

impl ProbeOps for FakeHal {
    fn device_exists(&self, path: &Path) -> bool {
        self.state().devices.contains_key(path)
    }

    fn partition_table(&self, disk: &Path) -> HalResult<String> {
        self.record_operation(Operation::PartitionTable {
            disk: disk.to_path_buf(),
        })?;
        Ok(format!("Disk {}: simulated", disk.display()))
    }
}

impl CopyOps for FakeHal {
    fn copy_tree(&self, src: &Path, dst: &Path) -> HalResult<u64> {
        self.record_operation(Operation::CopyTree {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
        })?;
        Ok(0)
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> HalResult<u64> {
        self.record_operation(Operation::CopyFile {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
        })?;
        Ok(std::fs::metadata(src).map(|m| m.len()).unwrap_or(0))
    }

    fn remove_file(&self, path: &Path) -> HalResult<()> {
        self.record_operation(Operation::RemoveFile {
            path: path.to_path_buf(),
        })
    }
}
