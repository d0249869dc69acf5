//! Provisioning configuration: defaults, builder and validation.
//!
//! A [`ProvisioningConfig`] is assembled once by [`ProvisioningConfigBuilder`] and then
//! shared read-only by every stage. The builder only hands out a
//! [`ValidatedConfig`], so stages never see unchecked input.

use crate::config_states::{HasRunMode, UnvalidatedConfig, ValidateConfig, ValidatedConfig};
use crate::digest::{DigestAlgorithm, ExpectedDigest};
use crate::errors::ProvisionError;
use regex::Regex;
use rockprov_hal::{partition_path, Codec};
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

pub const ZERO_FILL_URL: &str = "https://dl.radxa.com/rock5/sw/images/others/zero.img.gz";
pub const ZERO_FILL_MD5: &str = "ac581b250fda7a10d07ad11884a16834";
pub const ZERO_FILL_RAW_MD5: &str = "2c7ab85a893283e98c931e9511add182";
pub const BOOTLOADER_URL: &str =
    "https://github.com/huazi-yg/rock5b/releases/download/rock5b/rkspi_loader.img";
pub const BOOTLOADER_MD5: &str = "1b83982a5979008b4407552152732156";
pub const OS_IMAGE_URL: &str = "https://github.com/radxa/debos-radxa/releases/download/20221031-1045/rock-5b-ubuntu-focal-server-arm64-20221031-1328-gpt.img.xz";

pub const DISK: &str = "/dev/nvme0n1";
pub const FLASH_DEVICE: &str = "/dev/mtdblock0";
pub const TARGET_MOUNT: &str = "/mnt";

pub const INTERFACE: &str = "enP4p65s0";
pub const ADDRESS: &str = "10.10.0.11/24";
pub const GATEWAY: &str = "10.10.0.1";

pub const APT_PACKAGES: &str = "curl docker.io python3 python3-pip netplan.io ufw";
pub const PIP_PACKAGES: &str = "mysql.connector pillow google google.api google.cloud";
pub const REPO_DISTRO: &str = "focal-stable";
pub const REPO_KEY_URL: &str = "apt.radxa.com/focal-stable/public.key";

/// The root filesystem lives on partition 2 of the OS image; boot on partition 1.
pub const BOOT_PARTITION_NUMBER: u32 = 1;
pub const ROOT_PARTITION_NUMBER: u32 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct ZeroFillImage {
    pub url: String,
    pub compressed_digest: ExpectedDigest,
    pub raw_digest: ExpectedDigest,
}

#[derive(Debug, Clone, Serialize)]
pub struct BootloaderImage {
    pub url: String,
    pub digest: ExpectedDigest,
}

#[derive(Debug, Clone, Serialize)]
pub struct OsImage {
    pub url: String,
    /// Optional hardening: verify the downloaded (compressed) image before writing.
    pub digest: Option<ExpectedDigest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Devices {
    pub disk: PathBuf,
    pub boot_partition: PathBuf,
    pub root_partition: PathBuf,
    pub flash_device: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum NetworkConfig {
    Dhcp {
        interface: String,
    },
    Static {
        interface: String,
        /// Address with prefix length, e.g. `10.10.0.11/24`.
        address: String,
        gateway: String,
    },
}

impl NetworkConfig {
    pub fn interface(&self) -> &str {
        match self {
            Self::Dhcp { interface } | Self::Static { interface, .. } => interface,
        }
    }

    pub fn is_dhcp(&self) -> bool {
        matches!(self, Self::Dhcp { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Packages {
    pub apt: Vec<String>,
    pub pip: Vec<String>,
    pub repo_distro: String,
    pub repo_key_url: String,
}

/// Where a kernel package comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSource {
    Local(PathBuf),
    Remote(String),
}

impl ArtifactSource {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Remote(trimmed.to_string())
        } else {
            Self::Local(PathBuf::from(trimmed))
        }
    }
}

impl fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// Custom kernel packages; any subset may be present.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KernelArtifacts {
    pub image: Option<ArtifactSource>,
    pub headers: Option<ArtifactSource>,
    pub libc_dev: Option<ArtifactSource>,
}

impl KernelArtifacts {
    /// Present artifacts in install order, with their role names.
    pub fn present(&self) -> Vec<(&'static str, &ArtifactSource)> {
        [
            ("kernel image", self.image.as_ref()),
            ("kernel headers", self.headers.as_ref()),
            ("kernel libc-dev", self.libc_dev.as_ref()),
        ]
        .into_iter()
        .filter_map(|(role, source)| source.map(|s| (role, s)))
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageSelection {
    pub flash_spi: bool,
    pub install_os: bool,
    pub customize_os: bool,
}

impl Default for StageSelection {
    fn default() -> Self {
        Self {
            flash_spi: true,
            install_os: true,
            customize_os: true,
        }
    }
}

/// Immutable provisioning configuration shared by all stages.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningConfig {
    pub zero_fill: ZeroFillImage,
    pub bootloader: BootloaderImage,
    pub os_image: OsImage,
    pub devices: Devices,
    pub target_mount: PathBuf,
    pub work_dir: PathBuf,
    pub network: NetworkConfig,
    pub packages: Packages,
    pub kernel: KernelArtifacts,
    pub stages: StageSelection,
    pub dry_run: bool,
}

impl ProvisioningConfig {
    pub fn builder() -> ProvisioningConfigBuilder {
        ProvisioningConfigBuilder::default()
    }

    /// Human-readable listing of the resolved values, one per line.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Zero-fill image:     {}", self.zero_fill.url),
            format!("  compressed digest: {}", self.zero_fill.compressed_digest),
            format!("  raw digest:        {}", self.zero_fill.raw_digest),
            format!("Bootloader image:    {}", self.bootloader.url),
            format!("  digest:            {}", self.bootloader.digest),
            format!("OS image:            {}", self.os_image.url),
        ];
        if let Some(digest) = &self.os_image.digest {
            lines.push(format!("  digest:            {}", digest));
        }
        lines.extend([
            format!("Disk:                {}", self.devices.disk.display()),
            format!("Boot partition:      {}", self.devices.boot_partition.display()),
            format!("Root partition:      {}", self.devices.root_partition.display()),
            format!("Flash device:        {}", self.devices.flash_device.display()),
            format!("Target mount:        {}", self.target_mount.display()),
            format!("Work dir:            {}", self.work_dir.display()),
            format!("Interface:           {}", self.network.interface()),
        ]);
        match &self.network {
            NetworkConfig::Dhcp { .. } => lines.push("Address:             dhcp".to_string()),
            NetworkConfig::Static {
                address, gateway, ..
            } => {
                lines.push(format!("Address:             {}", address));
                lines.push(format!("Gateway:             {}", gateway));
            }
        }
        lines.push(format!("Packages:            {}", self.packages.apt.join(" ")));
        lines.push(format!("Pip packages:        {}", self.packages.pip.join(" ")));
        for (role, source) in self.kernel.present() {
            lines.push(format!("{:<21}{}", format!("{}:", capitalize(role)), source));
        }
        lines.push(format!(
            "Stages:              flash_spi={} install_os={} customize_os={}",
            self.stages.flash_spi, self.stages.install_os, self.stages.customize_os
        ));
        lines.join("\n")
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

impl HasRunMode for ProvisioningConfig {
    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

impl ValidateConfig for ProvisioningConfig {
    fn validate_cfg(&self) -> Result<(), ProvisionError> {
        for (name, path) in [
            ("disk", &self.devices.disk),
            ("boot partition", &self.devices.boot_partition),
            ("root partition", &self.devices.root_partition),
            ("flash device", &self.devices.flash_device),
            ("target mount", &self.target_mount),
            ("work dir", &self.work_dir),
        ] {
            if !path.is_absolute() {
                return Err(ProvisionError::Config(format!(
                    "{} must be an absolute path, got {:?}",
                    name, path
                )));
            }
        }
        if self.target_mount == Path::new("/") {
            return Err(ProvisionError::Config(
                "target mount must not be the host root".to_string(),
            ));
        }
        for (name, url) in [
            ("zero-fill URL", &self.zero_fill.url),
            ("bootloader URL", &self.bootloader.url),
            ("OS image URL", &self.os_image.url),
        ] {
            url::Url::parse(url)
                .map_err(|err| ProvisionError::Config(format!("{} {:?}: {}", name, url, err)))?;
        }
        if Codec::from_name(&self.zero_fill.url).is_none() {
            return Err(ProvisionError::Config(format!(
                "zero-fill URL must point at a .gz or .xz image: {}",
                self.zero_fill.url
            )));
        }
        for (_, source) in self.kernel.present() {
            if let ArtifactSource::Remote(url) = source {
                url::Url::parse(url).map_err(|err| {
                    ProvisionError::Config(format!("kernel artifact URL {:?}: {}", url, err))
                })?;
            }
        }
        if !(self.stages.flash_spi || self.stages.install_os || self.stages.customize_os) {
            return Err(ProvisionError::Config("no stages enabled".to_string()));
        }
        Ok(())
    }
}

/// Parse the `address`/`gateway` pair; the literal `dhcp` selects DHCP.
pub fn parse_network(
    interface: &str,
    address: &str,
    gateway: &str,
) -> Result<NetworkConfig, ProvisionError> {
    let interface = interface.trim();
    let iface_re = regex(r"^[A-Za-z0-9_.:-]{1,15}$")?;
    if !iface_re.is_match(interface) {
        return Err(ProvisionError::Config(format!(
            "invalid interface name {:?}",
            interface
        )));
    }

    let address = address.trim();
    if address.eq_ignore_ascii_case("dhcp") {
        return Ok(NetworkConfig::Dhcp {
            interface: interface.to_string(),
        });
    }

    let cidr_re = regex(r"^([0-9]{1,3}\.){3}[0-9]{1,3}/[0-9]{1,2}$")?;
    let ip_re = regex(r"^([0-9]{1,3}\.){3}[0-9]{1,3}$")?;
    let gateway = gateway.trim();

    let invalid_address =
        || ProvisionError::Config(format!("invalid address {:?} (expected a.b.c.d/nn or dhcp)", address));
    if !cidr_re.is_match(address) {
        return Err(invalid_address());
    }
    let (ip, prefix) = address.split_once('/').ok_or_else(invalid_address)?;
    ip.parse::<Ipv4Addr>().map_err(|_| invalid_address())?;
    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => {}
        _ => return Err(invalid_address()),
    }

    if !ip_re.is_match(gateway) || gateway.parse::<Ipv4Addr>().is_err() {
        return Err(ProvisionError::Config(format!(
            "invalid gateway {:?} (expected a.b.c.d)",
            gateway
        )));
    }

    Ok(NetworkConfig::Static {
        interface: interface.to_string(),
        address: address.to_string(),
        gateway: gateway.to_string(),
    })
}

fn regex(pattern: &str) -> Result<Regex, ProvisionError> {
    Regex::new(pattern).map_err(|err| ProvisionError::Config(err.to_string()))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"))
}

/// Collects raw values (defaults first, then overrides) and builds a validated config.
#[derive(Debug, Clone)]
pub struct ProvisioningConfigBuilder {
    pub zero_fill_url: String,
    pub zero_fill_digest: String,
    pub zero_fill_raw_digest: String,
    pub bootloader_url: String,
    pub bootloader_digest: String,
    pub os_image_url: String,
    pub os_image_digest: Option<String>,
    pub disk: String,
    pub boot_partition: Option<String>,
    pub root_partition: Option<String>,
    pub flash_device: String,
    pub target_mount: PathBuf,
    pub work_dir: PathBuf,
    pub interface: String,
    pub address: String,
    pub gateway: String,
    pub apt_packages: String,
    pub pip_packages: String,
    pub repo_distro: String,
    pub repo_key_url: String,
    pub kernel_image: Option<String>,
    pub kernel_headers: Option<String>,
    pub kernel_libc_dev: Option<String>,
    pub stages: StageSelection,
    pub dry_run: bool,
}

impl Default for ProvisioningConfigBuilder {
    fn default() -> Self {
        Self {
            zero_fill_url: ZERO_FILL_URL.to_string(),
            zero_fill_digest: ZERO_FILL_MD5.to_string(),
            zero_fill_raw_digest: ZERO_FILL_RAW_MD5.to_string(),
            bootloader_url: BOOTLOADER_URL.to_string(),
            bootloader_digest: BOOTLOADER_MD5.to_string(),
            os_image_url: OS_IMAGE_URL.to_string(),
            os_image_digest: None,
            disk: DISK.to_string(),
            boot_partition: None,
            root_partition: None,
            flash_device: FLASH_DEVICE.to_string(),
            target_mount: PathBuf::from(TARGET_MOUNT),
            work_dir: home_dir().join("flash"),
            interface: INTERFACE.to_string(),
            address: ADDRESS.to_string(),
            gateway: GATEWAY.to_string(),
            apt_packages: APT_PACKAGES.to_string(),
            pip_packages: PIP_PACKAGES.to_string(),
            repo_distro: REPO_DISTRO.to_string(),
            repo_key_url: REPO_KEY_URL.to_string(),
            kernel_image: None,
            kernel_headers: None,
            kernel_libc_dev: None,
            stages: StageSelection::default(),
            dry_run: false,
        }
    }
}

impl ProvisioningConfigBuilder {
    pub fn disk(mut self, disk: impl Into<String>) -> Self {
        self.disk = disk.into();
        self
    }

    pub fn flash_device(mut self, device: impl Into<String>) -> Self {
        self.flash_device = device.into();
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn target_mount(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target_mount = dir.into();
        self
    }

    pub fn network(
        mut self,
        interface: impl Into<String>,
        address: impl Into<String>,
        gateway: impl Into<String>,
    ) -> Self {
        self.interface = interface.into();
        self.address = address.into();
        self.gateway = gateway.into();
        self
    }

    pub fn stages(mut self, stages: StageSelection) -> Self {
        self.stages = stages;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Parse every raw value, then run structural validation.
    pub fn build(self) -> Result<ValidatedConfig<ProvisioningConfig>, ProvisionError> {
        let md5 = DigestAlgorithm::Md5;
        let optional = |raw: Option<String>| raw.filter(|s| !s.trim().is_empty());

        let disk = self.disk.trim().to_string();
        if disk.is_empty() {
            return Err(ProvisionError::Config("disk must not be empty".to_string()));
        }
        let boot_partition = optional(self.boot_partition)
            .unwrap_or_else(|| partition_path(&disk, BOOT_PARTITION_NUMBER));
        let root_partition = optional(self.root_partition)
            .unwrap_or_else(|| partition_path(&disk, ROOT_PARTITION_NUMBER));

        let cfg = ProvisioningConfig {
            zero_fill: ZeroFillImage {
                url: self.zero_fill_url,
                compressed_digest: ExpectedDigest::parse(md5, &self.zero_fill_digest)?,
                raw_digest: ExpectedDigest::parse(md5, &self.zero_fill_raw_digest)?,
            },
            bootloader: BootloaderImage {
                url: self.bootloader_url,
                digest: ExpectedDigest::parse(md5, &self.bootloader_digest)?,
            },
            os_image: OsImage {
                url: self.os_image_url,
                digest: optional(self.os_image_digest)
                    .map(|raw| ExpectedDigest::parse_any(&raw))
                    .transpose()?,
            },
            devices: Devices {
                disk: PathBuf::from(disk),
                boot_partition: PathBuf::from(boot_partition),
                root_partition: PathBuf::from(root_partition),
                flash_device: PathBuf::from(self.flash_device.trim()),
            },
            target_mount: self.target_mount,
            work_dir: self.work_dir,
            network: parse_network(&self.interface, &self.address, &self.gateway)?,
            packages: Packages {
                apt: split_list(&self.apt_packages),
                pip: split_list(&self.pip_packages),
                repo_distro: self.repo_distro.trim().to_string(),
                repo_key_url: self.repo_key_url.trim().to_string(),
            },
            kernel: KernelArtifacts {
                image: optional(self.kernel_image).map(|s| ArtifactSource::parse(&s)),
                headers: optional(self.kernel_headers).map(|s| ArtifactSource::parse(&s)),
                libc_dev: optional(self.kernel_libc_dev).map(|s| ArtifactSource::parse(&s)),
            },
            stages: self.stages,
            dry_run: self.dry_run,
        };

        UnvalidatedConfig::new(cfg).validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_and_match_known_values() {
        let cfg = ProvisioningConfig::builder().build().unwrap().0;
        assert_eq!(cfg.zero_fill.compressed_digest.hex(), ZERO_FILL_MD5);
        assert_eq!(cfg.zero_fill.raw_digest.hex(), ZERO_FILL_RAW_MD5);
        assert_eq!(cfg.bootloader.digest.hex(), BOOTLOADER_MD5);
        assert_eq!(cfg.devices.boot_partition, PathBuf::from("/dev/nvme0n1p1"));
        assert_eq!(cfg.devices.root_partition, PathBuf::from("/dev/nvme0n1p2"));
        assert_eq!(cfg.packages.apt.len(), 6);
        assert!(cfg.work_dir.ends_with("flash"));
        assert_eq!(
            cfg.network,
            NetworkConfig::Static {
                interface: INTERFACE.into(),
                address: ADDRESS.into(),
                gateway: GATEWAY.into()
            }
        );
    }

    #[test]
    fn partitions_follow_disk_override() {
        let cfg = ProvisioningConfig::builder()
            .disk("/dev/sda")
            .build()
            .unwrap()
            .0;
        assert_eq!(cfg.devices.boot_partition, PathBuf::from("/dev/sda1"));
        assert_eq!(cfg.devices.root_partition, PathBuf::from("/dev/sda2"));
    }

    #[test]
    fn malformed_digest_is_rejected() {
        let mut builder = ProvisioningConfig::builder();
        builder.bootloader_digest = "1b83982a".to_string();
        assert!(matches!(builder.build(), Err(ProvisionError::Config(_))));
    }

    #[test]
    fn network_accepts_dhcp_literal() {
        let net = parse_network("eth0", "DHCP", "").unwrap();
        assert_eq!(
            net,
            NetworkConfig::Dhcp {
                interface: "eth0".into()
            }
        );
    }

    #[test]
    fn network_rejects_bad_addresses() {
        assert!(parse_network("eth0", "10.10.0.11", "10.10.0.1").is_err());
        assert!(parse_network("eth0", "10.10.0.300/24", "10.10.0.1").is_err());
        assert!(parse_network("eth0", "10.10.0.11/33", "10.10.0.1").is_err());
        assert!(parse_network("eth0", "10.10.0.11/24", "10.10.0.1/24").is_err());
        assert!(parse_network("eth0 ; rm", "dhcp", "").is_err());
        assert!(parse_network("eth0", "10.10.0.11/24", "10.10.0.1").is_ok());
    }

    #[test]
    fn uncompressed_zero_fill_url_is_rejected() {
        let mut builder = ProvisioningConfig::builder();
        builder.zero_fill_url = "https://dl.radxa.com/zero.img".to_string();
        assert!(builder.build().is_err());
    }

    #[test]
    fn relative_device_path_is_rejected() {
        assert!(ProvisioningConfig::builder()
            .disk("nvme0n1")
            .build()
            .is_err());
    }

    #[test]
    fn kernel_sources_split_local_and_remote() {
        let mut builder = ProvisioningConfig::builder();
        builder.kernel_headers = Some("https://example.com/linux-headers.deb".to_string());
        builder.kernel_libc_dev = Some("/srv/linux-libc-dev.deb".to_string());
        builder.kernel_image = Some("  ".to_string());
        let cfg = builder.build().unwrap().0;

        let present = cfg.kernel.present();
        assert_eq!(present.len(), 2);
        assert_eq!(present[0].0, "kernel headers");
        assert!(matches!(present[0].1, ArtifactSource::Remote(_)));
        assert_eq!(
            present[1].1,
            &ArtifactSource::Local(PathBuf::from("/srv/linux-libc-dev.deb"))
        );
    }

    #[test]
    fn summary_lists_resolved_values() {
        let cfg = ProvisioningConfig::builder()
            .network("enP4p65s0", "dhcp", "")
            .build()
            .unwrap()
            .0;
        let summary = cfg.summary();
        assert!(summary.contains("Disk:                /dev/nvme0n1"));
        assert!(summary.contains("Address:             dhcp"));
        assert!(!summary.contains("Gateway"));
    }
}
