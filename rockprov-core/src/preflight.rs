use crate::config::{ArtifactSource, ProvisioningConfig};
use anyhow::{anyhow, bail, Context, Result};
use rockprov_hal::procfs::mountinfo::{is_mounted_from_info, mounted_under_device, parse_mountinfo};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const FLASH_BINARIES: &[&str] = &["sync"];
const DISK_BINARIES: &[&str] = &["sgdisk", "parted", "e2fsck", "resize2fs", "fdisk"];
const CUSTOMIZE_BINARIES: &[&str] = &["chroot", "mkfs.ext4"];

#[derive(Debug, Clone)]
pub struct PreflightConfig {
    pub required_binaries: Vec<String>,
    pub path_env: String,
    pub mountinfo_path: PathBuf,
    /// Devices (and their partitions) that must not be mounted.
    pub devices: Vec<PathBuf>,
    /// Must not already be a mount point.
    pub target_mount: Option<PathBuf>,
    pub require_network: bool,
    pub require_root: bool,
}

impl PreflightConfig {
    /// Checks needed for the stages enabled in `cfg`.
    pub fn for_config(cfg: &ProvisioningConfig) -> Self {
        let stages = cfg.stages;
        let mut binaries: Vec<&str> = Vec::new();
        let mut devices = Vec::new();
        if stages.flash_spi {
            binaries.extend(FLASH_BINARIES);
            devices.push(cfg.devices.flash_device.clone());
        }
        if stages.install_os {
            binaries.extend(DISK_BINARIES);
        }
        if stages.customize_os {
            binaries.extend(CUSTOMIZE_BINARIES);
        }
        if stages.install_os || stages.customize_os {
            devices.push(cfg.devices.disk.clone());
        }
        binaries.sort_unstable();
        binaries.dedup();

        let remote_kernel = cfg
            .kernel
            .present()
            .iter()
            .any(|(_, source)| matches!(source, ArtifactSource::Remote(_)));

        Self {
            required_binaries: binaries.into_iter().map(String::from).collect(),
            path_env: std::env::var("PATH").unwrap_or_default(),
            mountinfo_path: PathBuf::from("/proc/self/mountinfo"),
            devices,
            target_mount: stages.customize_os.then(|| cfg.target_mount.clone()),
            require_network: stages.flash_spi
                || stages.install_os
                || (stages.customize_os && remote_kernel),
            require_root: true,
        }
    }
}

pub struct PreflightChecks {
    pub network_check: Box<dyn Fn() -> Result<()> + Send + Sync>,
    pub root_check: Box<dyn Fn() -> bool + Send + Sync>,
}

impl PreflightChecks {
    pub fn with_network_check(check: Box<dyn Fn() -> Result<()> + Send + Sync>) -> Self {
        Self {
            network_check: check,
            ..Self::default()
        }
    }
}

impl Default for PreflightChecks {
    fn default() -> Self {
        Self {
            network_check: Box::new(check_network),
            root_check: Box::new(|| nix::unistd::geteuid().is_root()),
        }
    }
}

pub fn run(cfg: &ProvisioningConfig) -> Result<()> {
    run_with(&PreflightConfig::for_config(cfg), &PreflightChecks::default())
}

pub fn run_with(cfg: &PreflightConfig, checks: &PreflightChecks) -> Result<()> {
    log::info!("🧪 Preflight checks");

    if cfg.require_root && !(checks.root_check)() {
        bail!("Provisioning must run as root (effective uid 0)");
    }
    check_binaries(cfg)?;
    check_mounts(cfg)?;

    if cfg.require_network {
        (checks.network_check)()
            .map_err(|err| anyhow!("Network connectivity required: {}", err))?;
    }

    log::info!("✅ Preflight complete");
    Ok(())
}

fn check_binaries(cfg: &PreflightConfig) -> Result<()> {
    let missing: Vec<&str> = cfg
        .required_binaries
        .iter()
        .filter(|bin| find_executable_in_path(bin, &cfg.path_env).is_none())
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        bail!("Missing required binaries on PATH: {}", missing.join(", "));
    }
    Ok(())
}

fn check_mounts(cfg: &PreflightConfig) -> Result<()> {
    if cfg.devices.is_empty() && cfg.target_mount.is_none() {
        return Ok(());
    }
    let contents = fs::read_to_string(&cfg.mountinfo_path)
        .with_context(|| format!("Unable to read {}", cfg.mountinfo_path.display()))?;
    let entries = parse_mountinfo(&contents);

    for device in &cfg.devices {
        let mounts = mounted_under_device(&entries, device);
        if !mounts.is_empty() {
            let listed: Vec<String> = mounts.iter().map(|m| m.display().to_string()).collect();
            bail!(
                "Device appears mounted: {} (at {})",
                device.display(),
                listed.join(", ")
            );
        }
    }
    if let Some(target) = &cfg.target_mount {
        if is_mounted_from_info(target, &entries) {
            bail!("Target mount point is already in use: {}", target.display());
        }
    }
    Ok(())
}

fn find_executable_in_path(binary: &str, path_env: &str) -> Option<PathBuf> {
    for dir in path_env.split(':').filter(|dir| !dir.is_empty()) {
        let candidate = Path::new(dir).join(binary);
        if let Ok(metadata) = fs::metadata(&candidate) {
            if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
                return Some(candidate);
            }
        }
    }
    None
}

fn check_network() -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::new(1, 1, 1, 1), 53));
    TcpStream::connect_timeout(&addr, Duration::from_secs(2))
        .map(|_| ())
        .context("Unable to reach network")
}
