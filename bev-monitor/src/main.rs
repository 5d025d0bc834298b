#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;
mod config;
mod dashboard;
mod replay;

use anyhow::Result;
use clap::Parser;
use commands::Command;
use config::MonitorConfig;
use log::{info, warn};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bev-monitor", version, about = "Index, decode, score and render BEV occupancy labels")]
struct Cli {
    /// TOML config; defaults are used when the file does not exist
    #[arg(short, long, default_value = "configs/monitor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

fn log_init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn main() -> Result<()> {
    log_init();
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!("Loading config from {}", cli.config.display());
        MonitorConfig::from_file(&cli.config)?
    } else {
        warn!("{} not found, using default settings", cli.config.display());
        MonitorConfig::default()
    };

    commands::run(cli.command, &config)
}
