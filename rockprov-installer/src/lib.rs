use anyhow::Context;
use clap::Parser;
use rockprov_core::checksum::ChecksumVerifier;
use rockprov_core::config::ProvisioningConfigBuilder;
use rockprov_core::config_states::{ExecuteArmToken, ValidatedConfig};
use rockprov_core::fetch::HttpFetcher;
use rockprov_core::{preflight, ProvisioningConfig, ProvisioningPipeline};
use rockprov_hal::LinuxHal;
use std::path::Path;

pub mod cli;
pub mod file_config;

use cli::{Cli, Command, Overrides, RunArgs};
use file_config::FileConfig;

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    rockprov_core::logging::init(cli.verbose, cli.log_file.as_deref());

    match &cli.command {
        Command::Run(args) => run_provision(cli.config.as_deref(), args),
        Command::ShowConfig(overrides) => {
            let cfg = resolve_config(cli.config.as_deref(), overrides, false)?;
            println!("{}", cfg.inner().summary());
            Ok(())
        }
        Command::Preflight(overrides) => {
            log::info!("🔍 Running preflight checks...");
            let cfg = resolve_config(cli.config.as_deref(), overrides, false)?;
            preflight::run(cfg.inner())
        }
        Command::Digest { path, algorithm } => {
            let hal = LinuxHal::new();
            let hex = ChecksumVerifier::new(&hal)
                .digest(path, (*algorithm).into())
                .with_context(|| format!("Unable to digest {}", path.display()))?;
            println!("{}  {}", hex, path.display());
            Ok(())
        }
    }
}

/// Defaults, then the config file, then command-line overrides.
fn resolve_config(
    file: Option<&Path>,
    overrides: &Overrides,
    dry_run: bool,
) -> anyhow::Result<ValidatedConfig<ProvisioningConfig>> {
    let mut builder = ProvisioningConfigBuilder::default();
    if let Some(path) = file {
        log::info!("📄 Loading config {}", path.display());
        builder = FileConfig::load(path)?.apply(builder);
    }
    if let Some(disk) = &overrides.disk {
        builder = builder.disk(disk.clone());
        // Derived partitions must follow an overridden disk.
        builder.boot_partition = None;
        builder.root_partition = None;
    }
    if let Some(device) = &overrides.flash_device {
        builder = builder.flash_device(device.clone());
    }
    if let Some(dir) = &overrides.work_dir {
        builder = builder.work_dir(dir.clone());
    }
    if overrides.skip_flash {
        builder.stages.flash_spi = false;
    }
    if overrides.skip_disk {
        builder.stages.install_os = false;
    }
    if overrides.skip_customize {
        builder.stages.customize_os = false;
    }
    Ok(builder.dry_run(dry_run).build()?)
}

fn run_provision(file: Option<&Path>, args: &RunArgs) -> anyhow::Result<()> {
    let validated = resolve_config(file, &args.overrides, args.dry_run)?;
    log::info!("Configuration:\n{}", validated.inner().summary());

    let hal = LinuxHal::new();
    let fetcher = HttpFetcher::new()?;
    let pipeline = ProvisioningPipeline::new(&hal, &fetcher);

    if args.dry_run {
        validated.require_dry_run()?;
        pipeline.run_dry(&validated);
        log::info!("DRY RUN complete: no devices were touched");
        return Ok(());
    }

    let token = ExecuteArmToken::try_new(args.yes)?;
    if args.skip_preflight {
        log::warn!("⚠️ Preflight checks skipped");
    } else {
        preflight::run(validated.inner())?;
    }
    let armed = validated.arm_execute(token)?;

    let report = pipeline.run_armed(&armed)?;
    log::info!(
        "🎉 Provisioning complete: {}",
        report.completed_stages().join(", ")
    );
    Ok(())
}
