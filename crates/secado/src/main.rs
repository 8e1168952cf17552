// crates/secado/src/main.rs

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use secado_core::EngineConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
use commands::consolidate::{handle_consolidate, ConsolidateArgs};
use commands::curves::{handle_curves, CurvesArgs};

/// Consolidates grain-dryer sensor exports with lab batches and calibration curves
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Engine configuration in TOML. Defaults to $SECADO_CONFIG, then built-in settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Parse sensor files, match them to lab batches, calibrate and write the wide table.
    Consolidate(ConsolidateArgs),
    /// Show which calibration workbook a plant and year would use.
    Curves(CurvesArgs),
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Consolidate(args) => handle_consolidate(&config, args),
        Commands::Curves(args) => handle_curves(args),
    }
}

fn load_config(flag: Option<&Path>) -> Result<EngineConfig> {
    let path = flag
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("SECADO_CONFIG").map(PathBuf::from));
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading engine configuration");
            EngineConfig::from_path(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Store paths are `/`-separated regardless of platform.
pub(crate) fn store_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
