//! Linux HAL implementation using real system calls.

use super::flash_ops::{decompress_to_file, pump};
use super::{
    BlockReadOps, Codec, CopyOps, FlashOps, FlashOptions, FormatOps, FormatOptions, MountOps,
    MountOptions, PartedOp, PartedOptions, PartitionOps, ProbeOps, ProcessOps, SystemOps,
};
use crate::{HalError, HalResult};
use std::fs;
use std::io::{self, BufReader, Read, Write};
use std::os::unix::fs::{lchown, MetadataExt};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;
use walkdir::WalkDir;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const SYNC_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const FORMAT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const FSCK_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const RESIZE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const PARTED_TIMEOUT: Duration = Duration::from_secs(5 * 60);

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn output_failed(program: &str, output: &Output) -> HalError {
    HalError::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn output_with_timeout(
    program: &str,
    cmd: &mut Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> HalResult<Output> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    // Feed stdin from its own thread; a script larger than the pipe buffer would
    // otherwise block against a child that is blocked writing stdout.
    let stdin_handle = match (child.stdin.take(), stdin) {
        (Some(mut pipe), Some(bytes)) => {
            let bytes = bytes.to_vec();
            Some(std::thread::spawn(move || {
                if let Err(err) = pipe.write_all(&bytes) {
                    log::debug!("stdin write to child stopped early: {}", err);
                }
            }))
        }
        _ => None,
    };

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    if let Some(handle) = stdin_handle {
        let _ = handle.join();
    }
    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

fn status_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<()> {
    let output = output_with_timeout(program, cmd, None, timeout)?;
    if !output.status.success() {
        return Err(output_failed(program, &output));
    }
    Ok(())
}

fn map_nix_err(err: nix::errno::Errno) -> HalError {
    use nix::errno::Errno;
    match err {
        Errno::EBUSY => HalError::DeviceBusy,
        Errno::EACCES | Errno::EPERM => HalError::PermissionDenied,
        other => HalError::Nix(other),
    }
}

/// Open an existing device node (or pre-created file) for overwriting from offset 0.
fn open_target(target: &Path) -> HalResult<fs::File> {
    let out = fs::OpenOptions::new()
        .write(true)
        .open(target)
        .map_err(|source| HalError::DeviceWrite {
            target: target.to_path_buf(),
            source,
        })?;
    // Regular files (CI tests) are truncated; block devices keep their size.
    if out.metadata()?.file_type().is_file() {
        out.set_len(0)?;
    }
    Ok(out)
}

fn finish_target(out: fs::File, target: &Path) -> HalResult<()> {
    out.sync_all().map_err(|source| HalError::DeviceWrite {
        target: target.to_path_buf(),
        source,
    })
}

impl ProcessOps for LinuxHal {
    fn command_output(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        output_with_timeout(program, &mut cmd, None, timeout)
    }

    fn command_status_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> HalResult<()> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        let output = output_with_timeout(program, &mut cmd, stdin, timeout)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            log::debug!("[{}] {}", program, line);
        }
        if !output.status.success() {
            return Err(output_failed(program, &output));
        }
        Ok(())
    }
}

impl FlashOps for LinuxHal {
    fn write_raw(&self, source: &Path, target: &Path, opts: &FlashOptions) -> HalResult<u64> {
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        log::info!("💾 Writing {} -> {}", source.display(), target.display());

        let mut input = fs::File::open(source)?;
        let mut out = open_target(target)?;
        let written = pump(&mut input, &mut out, target, HalError::Io)?;
        finish_target(out, target)?;
        Ok(written)
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
            "💾 Streaming {} ({}) -> {}",
            source.display(),
            codec.extension(),
            target.display()
        );

        let input = fs::File::open(source)?;
        let mut reader = codec.decoder(BufReader::new(input));
        let mut out = open_target(target)?;
        let written = pump(&mut reader, &mut out, target, |err| HalError::Decompress {
            path: source.to_path_buf(),
            source: err,
        })?;
        finish_target(out, target)?;
        Ok(written)
    }

    fn decompress_file(&self, source: &Path, dest: &Path, codec: Codec) -> HalResult<u64> {
        log::info!("📦 Decompressing {} -> {}", source.display(), dest.display());
        decompress_to_file(source, dest, codec)
    }
}

impl BlockReadOps for LinuxHal {
    fn open_read(&self, path: &Path) -> HalResult<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }
}

impl MountOps for LinuxHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
    ) -> HalResult<()> {
        let flags = nix::mount::MsFlags::empty();
        let data = options.options.as_deref();

        nix::mount::mount(Some(device), target, fstype, flags, data).map_err(map_nix_err)?;

        Ok(())
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> HalResult<()> {
        nix::mount::mount(
            Some(source),
            target,
            None::<&str>,
            nix::mount::MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(map_nix_err)?;
        Ok(())
    }

    fn unmount(&self, target: &Path) -> HalResult<()> {
        nix::mount::umount2(target, nix::mount::MntFlags::empty()).map_err(map_nix_err)?;
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let content = fs::read_to_string("/proc/self/mountinfo")?;
        let entries = crate::procfs::mountinfo::parse_mountinfo(&content);
        Ok(crate::procfs::mountinfo::is_mounted_from_info(
            path, &entries,
        ))
    }
}

impl FormatOps for LinuxHal {
    fn format_ext4(&self, device: &Path, opts: &FormatOptions) -> HalResult<()> {
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        log::info!("🧹 mkfs.ext4 {}", device.display());
        let mut cmd = Command::new("mkfs.ext4");
        cmd.arg("-F").arg(device);
        status_with_timeout("mkfs.ext4", &mut cmd, FORMAT_TIMEOUT)
    }

    fn check_ext4(&self, device: &Path) -> HalResult<()> {
        let mut cmd = Command::new("e2fsck");
        cmd.args(["-f", "-p"]).arg(device);
        let output = output_with_timeout("e2fsck", &mut cmd, None, FSCK_TIMEOUT)?;
        match output.status.code() {
            Some(0) => Ok(()),
            Some(1) => {
                log::warn!("e2fsck corrected errors on {}", device.display());
                Ok(())
            }
            _ => Err(output_failed("e2fsck", &output)),
        }
    }

    fn grow_ext4(&self, device: &Path) -> HalResult<()> {
        let mut cmd = Command::new("resize2fs");
        cmd.arg(device);
        status_with_timeout("resize2fs", &mut cmd, RESIZE_TIMEOUT)
    }
}

impl PartitionOps for LinuxHal {
    fn relocate_backup_gpt(&self, disk: &Path, opts: &PartedOptions) -> HalResult<()> {
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        let mut cmd = Command::new("sgdisk");
        cmd.arg("--move-second-header").arg(disk);
        status_with_timeout("sgdisk", &mut cmd, PARTED_TIMEOUT)
    }

    fn parted(&self, disk: &Path, op: PartedOp, opts: &PartedOptions) -> HalResult<String> {
        let mut args: Vec<String> = vec!["--script".to_string(), disk.display().to_string()];
        match op {
            PartedOp::ResizePart { part_num, end } => {
                if !opts.confirmed {
                    return Err(HalError::SafetyLock);
                }
                args.push("--".to_string());
                args.push("resizepart".to_string());
                args.push(part_num.to_string());
                args.push(end);
            }
            PartedOp::Print => {
                args.push("unit".to_string());
                args.push("MiB".to_string());
                args.push("print".to_string());
            }
        }

        let mut cmd = Command::new("parted");
        cmd.args(&args);
        let output = output_with_timeout("parted", &mut cmd, None, PARTED_TIMEOUT)?;
        if !output.status.success() {
            return Err(output_failed("parted", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl SystemOps for LinuxHal {
    fn sync(&self) -> HalResult<()> {
        let mut cmd = Command::new("sync");
        status_with_timeout("sync", &mut cmd, SYNC_TIMEOUT)
    }
}

impl ProbeOps for LinuxHal {
    fn device_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn partition_table(&self, disk: &Path) -> HalResult<String> {
        let mut cmd = Command::new("fdisk");
        cmd.arg("-l").arg(disk);
        let output = output_with_timeout("fdisk", &mut cmd, None, PROBE_TIMEOUT)?;
        if !output.status.success() {
            return Err(output_failed("fdisk", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl CopyOps for LinuxHal {
    fn copy_tree(&self, src: &Path, dst: &Path) -> HalResult<u64> {
        let mut files = 0u64;
        fs::create_dir_all(dst)?;
        for entry in WalkDir::new(src).min_depth(1) {
            let entry = entry.map_err(|err| HalError::Io(io::Error::other(err.to_string())))?;
            let rel = entry
                .path()
                .strip_prefix(src)
                .map_err(|err| HalError::Other(err.to_string()))?;
            let dest = dst.join(rel);
            let meta = entry.path().symlink_metadata()?;
            let file_type = meta.file_type();

            if file_type.is_dir() {
                fs::create_dir_all(&dest)?;
                fs::set_permissions(&dest, meta.permissions())?;
            } else if file_type.is_symlink() {
                let link = fs::read_link(entry.path())?;
                if dest.symlink_metadata().is_ok() {
                    fs::remove_file(&dest)?;
                }
                std::os::unix::fs::symlink(link, &dest)?;
            } else {
                fs::copy(entry.path(), &dest)?;
                files += 1;
            }
            lchown(&dest, Some(meta.uid()), Some(meta.gid()))?;
        }
        Ok(files)
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> HalResult<u64> {
        Ok(fs::copy(src, dst)?)
    }

    fn remove_file(&self, path: &Path) -> HalResult<()> {
        Ok(fs::remove_file(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn format_ext4_requires_confirmation() {
        let hal = LinuxHal::new();
        let err = hal
            .format_ext4(Path::new("/dev/null"), &FormatOptions::new(false))
            .unwrap_err();
        assert!(matches!(err, HalError::SafetyLock));
    }

    #[test]
    fn write_raw_replaces_file_contents() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("zero.img");
        let target = dir.path().join("mtdblock0");
        std::fs::write(&image, b"test content").unwrap();
        std::fs::write(&target, b"previous longer content").unwrap();

        let hal = LinuxHal::new();
        let n = hal
            .write_raw(&image, &target, &FlashOptions::new(true))
            .unwrap();

        assert_eq!(n, 12);
        assert_eq!(std::fs::read(&target).unwrap(), b"test content");
    }

    #[test]
    fn write_raw_does_not_create_missing_target() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("zero.img");
        std::fs::write(&image, b"x").unwrap();
        let target = dir.path().join("absent");

        let err = LinuxHal::new()
            .write_raw(&image, &target, &FlashOptions::new(true))
            .unwrap_err();
        assert!(matches!(err, HalError::DeviceWrite { .. }));
        assert!(!target.exists());
    }

    #[test]
    fn write_compressed_streams_xz() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("os.img.xz");
        let target = dir.path().join("disk.img");
        std::fs::write(&target, b"").unwrap();

        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(b"compressed data").unwrap();
        std::fs::write(&image, encoder.finish().unwrap()).unwrap();

        let hal = LinuxHal::new();
        hal.write_compressed(&image, &target, Codec::Xz, &FlashOptions::new(true))
            .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"compressed data");
    }

    #[test]
    fn write_compressed_decodes_every_gzip_member() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("os.img.gz");
        let target = dir.path().join("disk.img");
        std::fs::write(&target, b"").unwrap();

        let mut compressed = Vec::new();
        for part in [&b"first-member-"[..], &b"second-member"[..]] {
            let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
            enc.write_all(part).unwrap();
            compressed.extend(enc.finish().unwrap());
        }
        std::fs::write(&image, compressed).unwrap();

        let n = LinuxHal::new()
            .write_compressed(&image, &target, Codec::Gzip, &FlashOptions::new(true))
            .unwrap();

        assert_eq!(n, 26);
        assert_eq!(
            std::fs::read(&target).unwrap(),
            b"first-member-second-member"
        );
    }

    #[test]
    fn write_compressed_decodes_concatenated_xz_streams() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("os.img.xz");
        let target = dir.path().join("disk.img");
        std::fs::write(&target, b"").unwrap();

        let mut compressed = Vec::new();
        for part in [&b"stream-one/"[..], &b"stream-two"[..]] {
            let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
            enc.write_all(part).unwrap();
            compressed.extend(enc.finish().unwrap());
        }
        std::fs::write(&image, compressed).unwrap();

        LinuxHal::new()
            .write_compressed(&image, &target, Codec::Xz, &FlashOptions::new(true))
            .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"stream-one/stream-two");
    }

    #[test]
    fn decompress_file_writes_gzip_payload() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("zero.img.gz");
        let dest = dir.path().join("zero.img");
        let payload = vec![0u8; 3 * 1024 * 1024 + 17];
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        enc.write_all(&payload).unwrap();
        std::fs::write(&src, enc.finish().unwrap()).unwrap();

        let n = LinuxHal::new()
            .decompress_file(&src, &dest, Codec::Gzip)
            .unwrap();

        assert_eq!(n, payload.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
    }

    #[test]
    fn copy_tree_copies_nested_files_and_links() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("boot");
        let dst = dir.path().join("restored");
        std::fs::create_dir_all(src.join("extlinux")).unwrap();
        std::fs::write(src.join("vmlinuz"), b"kernel").unwrap();
        std::fs::write(src.join("extlinux/extlinux.conf"), b"label l0").unwrap();
        std::os::unix::fs::symlink("vmlinuz", src.join("vmlinuz.old")).unwrap();

        let files = LinuxHal::new().copy_tree(&src, &dst).unwrap();

        assert_eq!(files, 2);
        assert_eq!(std::fs::read(dst.join("vmlinuz")).unwrap(), b"kernel");
        assert_eq!(
            std::fs::read(dst.join("extlinux/extlinux.conf")).unwrap(),
            b"label l0"
        );
        assert_eq!(
            std::fs::read_link(dst.join("vmlinuz.old")).unwrap(),
            Path::new("vmlinuz")
        );
    }

    #[test]
    fn command_with_stdin_reports_exit_code() {
        let hal = LinuxHal::new();
        hal.command_status_with_stdin("sh", &["-s"], Some(b"exit 0\n"), Duration::from_secs(10))
            .unwrap();
        let err = hal
            .command_status_with_stdin("sh", &["-s"], Some(b"exit 3\n"), Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, HalError::CommandFailed { code: Some(3), .. }));
    }

    #[test]
    fn child_ignoring_stdin_does_not_fail_the_command() {
        let script = vec![b'#'; 4 * 1024 * 1024];
        LinuxHal::new()
            .command_status_with_stdin("sh", &["-c", "exit 0"], Some(&script), Duration::from_secs(10))
            .unwrap();
    }

    #[test]
    fn missing_program_maps_to_command_not_found() {
        let err = LinuxHal::new()
            .command_output("rockprov-no-such-tool", &[], Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, HalError::CommandNotFound(_)));
    }
}
