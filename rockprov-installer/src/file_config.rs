//! Optional TOML configuration file.
//!
//! Every field is optional; anything left out keeps the built-in default.
//! See `docs/provision.example.toml`.

use anyhow::{Context, Result};
use rockprov_core::config::ProvisioningConfigBuilder;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub images: ImagesSection,
    pub devices: DevicesSection,
    pub paths: PathsSection,
    pub network: NetworkSection,
    pub packages: PackagesSection,
    pub kernel: KernelSection,
    pub stages: StagesSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesSection {
    pub zero_fill_url: Option<String>,
    pub zero_fill_md5: Option<String>,
    pub zero_fill_raw_md5: Option<String>,
    pub bootloader_url: Option<String>,
    pub bootloader_md5: Option<String>,
    pub os_image_url: Option<String>,
    /// md5 or sha256, inferred from length.
    pub os_image_digest: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DevicesSection {
    pub disk: Option<String>,
    pub boot_partition: Option<String>,
    pub root_partition: Option<String>,
    pub flash_device: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsSection {
    pub work_dir: Option<PathBuf>,
    pub target_mount: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkSection {
    pub interface: Option<String>,
    pub address: Option<String>,
    pub gateway: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackagesSection {
    pub apt: Option<Vec<String>>,
    pub pip: Option<Vec<String>>,
    pub repo_distro: Option<String>,
    pub repo_key_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelSection {
    pub image: Option<String>,
    pub headers: Option<String>,
    pub libc_dev: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StagesSection {
    pub flash_spi: Option<bool>,
    pub install_os: Option<bool>,
    pub customize_os: Option<bool>,
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Unable to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Layer the file's values onto `builder`.
    pub fn apply(self, mut builder: ProvisioningConfigBuilder) -> ProvisioningConfigBuilder {
        let b = &mut builder;

        let images = self.images;
        set(&mut b.zero_fill_url, images.zero_fill_url);
        set(&mut b.zero_fill_digest, images.zero_fill_md5);
        set(&mut b.zero_fill_raw_digest, images.zero_fill_raw_md5);
        set(&mut b.bootloader_url, images.bootloader_url);
        set(&mut b.bootloader_digest, images.bootloader_md5);
        set(&mut b.os_image_url, images.os_image_url);
        if images.os_image_digest.is_some() {
            b.os_image_digest = images.os_image_digest;
        }

        let devices = self.devices;
        set(&mut b.disk, devices.disk);
        if devices.boot_partition.is_some() {
            b.boot_partition = devices.boot_partition;
        }
        if devices.root_partition.is_some() {
            b.root_partition = devices.root_partition;
        }
        set(&mut b.flash_device, devices.flash_device);

        set(&mut b.work_dir, self.paths.work_dir);
        set(&mut b.target_mount, self.paths.target_mount);

        set(&mut b.interface, self.network.interface);
        set(&mut b.address, self.network.address);
        set(&mut b.gateway, self.network.gateway);

        let packages = self.packages;
        set(&mut b.apt_packages, packages.apt.map(|list| list.join(" ")));
        set(&mut b.pip_packages, packages.pip.map(|list| list.join(" ")));
        set(&mut b.repo_distro, packages.repo_distro);
        set(&mut b.repo_key_url, packages.repo_key_url);

        let kernel = self.kernel;
        if kernel.image.is_some() {
            b.kernel_image = kernel.image;
        }
        if kernel.headers.is_some() {
            b.kernel_headers = kernel.headers;
        }
        if kernel.libc_dev.is_some() {
            b.kernel_libc_dev = kernel.libc_dev;
        }

        set(&mut b.stages.flash_spi, self.stages.flash_spi);
        set(&mut b.stages.install_os, self.stages.install_os);
        set(&mut b.stages.customize_os, self.stages.customize_os);

        builder
    }
}
