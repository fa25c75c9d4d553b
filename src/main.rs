use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use idasen_cli::config::{Config, ConfigStore};
use idasen_cli::desk::protocol::{HEIGHT_MAX_MM, HEIGHT_MIN_MM};
use idasen_cli::desk::{discover_desk, BleTransport, DeskController, MoveOutcome};
use idasen_cli::error::DeskError;

const SCAN_DURATION: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "idasen", version, about = "Control an IKEA Idasen desk")]
struct Cli {
    /// Config file location (default: <config dir>/idasen/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Find and configure desk
    Scan,
    /// Show current height
    Height,
    /// Move to a preset name or a height in millimeters
    Move { target: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let store = match cli.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::new(ConfigStore::default_location()?),
    };

    match cli.command {
        CliCommand::Scan => cmd_scan(&store).await,
        CliCommand::Height => cmd_height(&store).await,
        CliCommand::Move { target } => cmd_move(&store, &target).await,
    }
}

async fn cmd_scan(store: &ConfigStore) -> Result<()> {
    println!("Scanning for desk...");
    let desk = discover_desk(SCAN_DURATION)
        .await?
        .context("No desk found. Check power and Bluetooth.")?;
    println!("Found: {} ({})", desk.name, desk.address);

    let mut config = store.load()?;
    config.mac_address = Some(desk.address);
    store.save(&config)?;

    println!("Saved config to {}", store.path().display());
    let presets = config
        .presets
        .iter()
        .map(|(name, mm)| format!("{name}={mm}mm"))
        .collect::<Vec<_>>()
        .join(", ");
    println!("Presets: {presets}");
    Ok(())
}

async fn cmd_height(store: &ConfigStore) -> Result<()> {
    let config = store.load()?;
    let desk = connect_desk(&config).await?;

    let result = tokio::select! {
        height = desk.get_height() => height.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
    };
    release(&desk).await;

    println!("{:.0}mm", result?);
    Ok(())
}

async fn cmd_move(store: &ConfigStore, token: &str) -> Result<()> {
    let config = store.load()?;
    let target_mm = config.resolve_target(token)?;
    if !(HEIGHT_MIN_MM..=HEIGHT_MAX_MM).contains(&target_mm) {
        bail!(
            "target {target_mm:.0}mm is outside the desk's travel \
             ({HEIGHT_MIN_MM:.0}mm to {HEIGHT_MAX_MM:.0}mm)"
        );
    }

    let desk = connect_desk(&config).await?;
    println!("Moving to {target_mm:.0}mm...");

    let result = tokio::select! {
        report = desk.move_to(target_mm) => report.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted, stopping desk")),
    };
    release(&desk).await;

    let report = result?;
    match report.outcome {
        MoveOutcome::AlreadyAtTarget => {
            println!("Already at target ({:.0}mm)", report.final_height_mm)
        }
        _ => println!("{:.0}mm", report.final_height_mm),
    }
    Ok(())
}

async fn connect_desk(config: &Config) -> Result<DeskController<BleTransport>> {
    let address = config.mac_address.as_deref().ok_or(DeskError::NotConfigured)?;
    let transport = BleTransport::connect(address).await?;
    Ok(DeskController::new(transport))
}

/// Best-effort teardown: halt any motion, then drop the connection.
async fn release(desk: &DeskController<BleTransport>) {
    if let Err(err) = desk.stop().await {
        log::warn!("could not stop desk during shutdown: {err}");
    }
    desk.transport().disconnect().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }
}
