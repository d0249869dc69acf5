//! CLI argument parsing for rockprov

use clap::{Args, Parser, Subcommand, ValueEnum};
use rockprov_core::digest::DigestAlgorithm;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rockprov", version)]
#[command(about = "🪨 rockprov - Rock 5B SPI flash, NVMe install and customization")]
#[command(long_about = "🪨 rockprov - Rock 5B SPI flash, NVMe install and customization\n\n\
    Flashes the SPI bootloader, writes the OS image to NVMe, grows the root\n\
    filesystem and customizes it through a chroot. Every downloaded image and\n\
    every flash write is checked against a known-good digest.\n\n\
    Destructive runs require --yes. Use --dry-run to see the plan first.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file layered over the built-in defaults
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also append log output to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// 💾 Run the provisioning stages
    Run(RunArgs),

    /// 📋 Print the resolved configuration and exit
    ShowConfig(Overrides),

    /// 🔍 Run preflight checks for the enabled stages
    Preflight(Overrides),

    /// 🔎 Print the digest of a file or device
    Digest {
        path: PathBuf,

        #[arg(long, value_enum, default_value = "md5")]
        algorithm: AlgorithmArg,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Confirm destructive operation (required unless --dry-run)
    #[arg(long)]
    pub yes: bool,

    /// Log the plan without touching any device
    #[arg(long)]
    pub dry_run: bool,

    /// Skip host preflight checks
    #[arg(long)]
    pub skip_preflight: bool,
}

/// Command-line values that win over the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Target NVMe disk (e.g., /dev/nvme0n1)
    #[arg(long)]
    pub disk: Option<String>,

    /// SPI flash block device (e.g., /dev/mtdblock0)
    #[arg(long)]
    pub flash_device: Option<String>,

    /// Download directory for images
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Skip the SPI bootloader flash
    #[arg(long)]
    pub skip_flash: bool,

    /// Skip the OS image install
    #[arg(long)]
    pub skip_disk: bool,

    /// Skip the chroot customization
    #[arg(long)]
    pub skip_customize: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AlgorithmArg {
    Md5,
    Sha256,
}

impl From<AlgorithmArg> for DigestAlgorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Md5 => DigestAlgorithm::Md5,
            AlgorithmArg::Sha256 => DigestAlgorithm::Sha256,
        }
    }
}
