//! merchant-watch: wandering merchant schedule and replay tool.
//!
//! ## Subcommands
//!
//! - `schedule`: Print each merchant's next appearance window for a region
//! - `replay`: Run the engine against a scripted transport and print what
//!   it would notify

mod logging;
mod replay;
mod schedule;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use merchant_watch_core::{load_config, Catalogue, EngineExit, WatchConfig, WatchError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("No catalogue given; pass --catalogue or set paths.catalogue in the config")]
    NoCatalogue,

    #[error("Invalid replay script: {0}")]
    Script(String),

    #[error("Engine task failed: {0}")]
    Engine(String),
}

#[derive(Parser)]
#[command(name = "merchant-watch")]
#[command(about = "Wandering merchant appearance tracker")]
#[command(version)]
struct Cli {
    /// Engine config file (defaults to ~/.merchant-watch/watch.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the next appearance window of every merchant
    Schedule {
        /// Server region whose clock the appearance times follow
        #[arg(long)]
        region: String,

        /// Catalogue JSON file
        #[arg(long, value_name = "PATH")]
        catalogue: Option<PathBuf>,

        /// Evaluate at this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Drive the engine from a JSON script of transport events
    Replay {
        /// Replay script JSON file
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,

        /// Catalogue JSON file
        #[arg(long, value_name = "PATH")]
        catalogue: Option<PathBuf>,

        /// Settings JSON file (selections are written back to it)
        #[arg(long, value_name = "PATH")]
        settings: Option<PathBuf>,

        /// Discard notifications instead of printing them
        #[arg(long)]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let config = match load_config(cli.config.clone()) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to load config; using defaults");
            WatchConfig::default()
        }
    };

    match cli.command {
        Commands::Schedule {
            region,
            catalogue,
            at,
            json,
        } => {
            let result = open_catalogue(catalogue, &config).and_then(|catalogue| {
                schedule::run(&catalogue, &config, &region, at.unwrap_or_else(Utc::now), json)
            });
            if let Err(e) = result {
                tracing::error!(error = %e, "merchant-watch schedule failed");
                std::process::exit(1);
            }
        }
        Commands::Replay {
            script,
            catalogue,
            settings,
            quiet,
        } => {
            let catalogue = match open_catalogue(catalogue, &config) {
                Ok(catalogue) => catalogue,
                Err(e) => {
                    tracing::error!(error = %e, "merchant-watch replay failed");
                    std::process::exit(1);
                }
            };
            let settings = settings.or_else(|| config.paths.settings.clone());
            match replay::run(config, catalogue, &script, settings, quiet).await {
                Ok(EngineExit::Shutdown) => {}
                Ok(EngineExit::ReloadRequired) => {
                    tracing::warn!("Server requires a newer client");
                    std::process::exit(2);
                }
                Err(e) => {
                    tracing::error!(error = %e, "merchant-watch replay failed");
                    std::process::exit(1);
                }
            }
        }
    }
}

fn open_catalogue(path: Option<PathBuf>, config: &WatchConfig) -> Result<Catalogue, CliError> {
    let path = path
        .or_else(|| config.paths.catalogue.clone())
        .ok_or(CliError::NoCatalogue)?;
    Ok(Catalogue::load(&path)?)
}
