//! Customize the freshly installed root filesystem through a chroot.

use super::Steps;
use crate::chroot_script::{self, BOOT_SNAPSHOT_DIR};
use crate::config::{ArtifactSource, ProvisioningConfig};
use crate::config_states::ArmedConfig;
use crate::errors::{ProvisionError, StageResult};
use crate::fetch::{file_name_from_url, ImageFetcher};
use crate::netplan;
use crate::report::StageRecord;
use rockprov_hal::{FormatOptions, MountSet, ProvisionHal};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const STAGE_NAME: &str = "customize";

/// apt upgrade on a fresh image can take a long time.
const CHROOT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
const DPKG_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Host paths bind-mounted into the target, in mount order.
const BIND_MOUNTS: [&str; 4] = ["/dev", "/dev/pts", "/proc", "/sys"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomizeStep {
    MountTargets,
    RunChrootScript,
    WriteNetworkConfig,
    ReformatBootPartition,
    InstallKernelArtifacts,
    ReleaseMounts,
}

impl CustomizeStep {
    pub const ALL: [CustomizeStep; 6] = [
        CustomizeStep::MountTargets,
        CustomizeStep::RunChrootScript,
        CustomizeStep::WriteNetworkConfig,
        CustomizeStep::ReformatBootPartition,
        CustomizeStep::InstallKernelArtifacts,
        CustomizeStep::ReleaseMounts,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CustomizeStep::MountTargets => "MountTargets",
            CustomizeStep::RunChrootScript => "RunChrootScript",
            CustomizeStep::WriteNetworkConfig => "WriteNetworkConfig",
            CustomizeStep::ReformatBootPartition => "ReformatBootPartition",
            CustomizeStep::InstallKernelArtifacts => "InstallKernelArtifacts",
            CustomizeStep::ReleaseMounts => "ReleaseMounts",
        }
    }
}

impl fmt::Display for CustomizeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn plan(cfg: &ProvisioningConfig) -> Vec<String> {
    CustomizeStep::ALL
        .iter()
        .map(|step| match step {
            CustomizeStep::MountTargets => format!(
                "{} ({} at {})",
                step,
                cfg.devices.root_partition.display(),
                cfg.target_mount.display()
            ),
            CustomizeStep::InstallKernelArtifacts => {
                let roles: Vec<&str> = cfg.kernel.present().iter().map(|(role, _)| *role).collect();
                if roles.is_empty() {
                    format!("{} (none configured)", step)
                } else {
                    format!("{} ({})", step, roles.join(", "))
                }
            }
            _ => step.to_string(),
        })
        .collect()
}

fn path_arg(path: &Path) -> Result<&str, ProvisionError> {
    path.to_str().ok_or_else(|| {
        ProvisionError::Config(format!("path is not valid UTF-8: {}", path.display()))
    })
}

pub struct CustomizeStage<'a> {
    cfg: &'a ProvisioningConfig,
    hal: &'a dyn ProvisionHal,
    fetcher: &'a dyn ImageFetcher,
}

impl<'a> CustomizeStage<'a> {
    pub fn new(
        armed: &'a ArmedConfig<ProvisioningConfig>,
        hal: &'a dyn ProvisionHal,
        fetcher: &'a dyn ImageFetcher,
    ) -> Self {
        Self {
            cfg: &armed.cfg,
            hal,
            fetcher,
        }
    }

    /// Any failure drops the mount set, which unmounts in reverse order.
    pub fn run(&self, record: &mut StageRecord) -> StageResult {
        let cfg = self.cfg;
        let hal = self.hal;
        let target = cfg.target_mount.as_path();
        let boot = target.join("boot");
        let mut steps = Steps::new(STAGE_NAME, CustomizeStep::ALL.len(), record);
        let mut mounts = MountSet::new(hal);

        steps.step(CustomizeStep::MountTargets, || {
            fs::create_dir_all(target)
                .map_err(|err| ProvisionError::io(format!("create {}", target.display()), err))?;
            if hal.is_mounted(target)? {
                return Err(ProvisionError::Config(format!(
                    "{} is already a mount point",
                    target.display()
                )));
            }
            mounts.mount(&cfg.devices.root_partition, target, Some("ext4"))?;
            mounts.mount(&cfg.devices.boot_partition, &boot, None)?;
            for host in BIND_MOUNTS {
                let inside = target.join(host.trim_start_matches('/'));
                mounts.bind(Path::new(host), &inside)?;
            }
            for entry in mounts.entries() {
                log::debug!("mounted {} at {}", entry.source.display(), entry.target.display());
            }
            Ok(())
        })?;

        steps.step(CustomizeStep::RunChrootScript, || {
            let script = chroot_script::render(cfg);
            log::debug!("chroot script:\n{}", script);
            hal.command_status_with_stdin(
                "chroot",
                &[path_arg(target)?, "/bin/bash", "-s"],
                Some(script.as_bytes()),
                CHROOT_SCRIPT_TIMEOUT,
            )?;
            Ok(())
        })?;

        steps.step(CustomizeStep::WriteNetworkConfig, || {
            netplan::write_to(target, &cfg.network).map(|_| ())
        })?;

        steps.step(CustomizeStep::ReformatBootPartition, || {
            let device = &cfg.devices.boot_partition;
            mounts.unmount_one(&boot)?;
            hal.format_ext4(device, &FormatOptions::new(true))?;
            mounts.mount(device, &boot, Some("ext4"))?;
            let files = hal.copy_tree(&target.join(BOOT_SNAPSHOT_DIR), &boot)?;
            log::info!("📦 restored {} boot files onto ext4 {}", files, device.display());
            Ok(())
        })?;

        steps.step(CustomizeStep::InstallKernelArtifacts, || {
            self.install_kernel_artifacts(target)
        })?;

        steps.step(CustomizeStep::ReleaseMounts, move || Ok(mounts.release()?))?;
        Ok(())
    }

    fn install_kernel_artifacts(&self, target: &Path) -> Result<(), ProvisionError> {
        let artifacts = self.cfg.kernel.present();
        if artifacts.is_empty() {
            log::info!("no custom kernel artifacts configured");
            return Ok(());
        }
        for (role, source) in artifacts {
            let local = self.resolve(source)?;
            let name = local
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    ProvisionError::Config(format!("{} has no file name: {}", role, source))
                })?
                .to_string();
            let staged = target.join(&name);
            log::info!("📦 installing {} {}", role, name);
            self.hal.copy_file(&local, &staged)?;
            self.hal.command_status(
                "chroot",
                &[path_arg(target)?, "/bin/bash", "-c", &format!("dpkg -i /{}", name)],
                DPKG_TIMEOUT,
            )?;
            self.hal.remove_file(&staged)?;
        }
        Ok(())
    }

    fn resolve(&self, source: &ArtifactSource) -> Result<PathBuf, ProvisionError> {
        match source {
            ArtifactSource::Local(path) => Ok(path.clone()),
            ArtifactSource::Remote(url) => {
                let name = file_name_from_url(url)?;
                let artifact = self
                    .fetcher
                    .fetch(url, &self.cfg.work_dir.join(name), None)?;
                Ok(artifact.path)
            }
        }
    }
}
