//! Pizza watcher CLI
//!
//! Inspect the observation history, rerun anomaly detection, query the
//! Overpass API once, and check on a running watcher.

mod client;
mod commands;
mod config;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{check, history, places, status};
use watch_lib::anomaly::{DetectorConfig, DEFAULT_HISTORY_CAPACITY};
use watch_lib::monitor::{DEFAULT_LEDGER_FILE, DEFAULT_STATS_FILE};
use watch_lib::overpass::{OverpassConfig, PlaceFilter, SearchArea};
use watch_lib::store::{PlaceLedger, StatsStore};

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Pizza watcher CLI
#[derive(Parser)]
#[command(name = "pwatch")]
#[command(author, version, about = "CLI for the Pizza Watcher", long_about = None)]
pub struct Cli {
    /// Stats log written by the watcher
    #[arg(long, env = "PWATCH_STATS_FILE", global = true)]
    pub stats_file: Option<PathBuf>,

    /// Known-places ledger written by the watcher
    #[arg(long, env = "PWATCH_KNOWN_FILE", global = true)]
    pub known_file: Option<PathBuf>,

    /// Watcher API endpoint URL (can also be set via PWATCH_API_URL env var)
    #[arg(long, env = "PWATCH_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, global = true)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show recent observations
    History {
        /// Number of observations to show
        #[arg(long, short, default_value_t = 24)]
        limit: usize,
    },

    /// Rerun anomaly detection over the recorded ratios
    Check {
        /// Score above which the latest ratio is anomalous
        #[arg(long, default_value_t = DetectorConfig::default().threshold)]
        threshold: f64,

        /// Seasonal period in polls
        #[arg(long, default_value_t = DetectorConfig::default().period)]
        period: usize,

        /// Number of recent ratios to analyse
        #[arg(long, default_value_t = DEFAULT_HISTORY_CAPACITY)]
        window: usize,

        /// Disable robustness weights in the decomposition
        #[arg(long)]
        no_robust: bool,
    },

    /// Query the Overpass API once and list the places found
    Places {
        #[arg(long, default_value_t = SearchArea::default().latitude, allow_negative_numbers = true)]
        latitude: f64,

        #[arg(long, default_value_t = SearchArea::default().longitude, allow_negative_numbers = true)]
        longitude: f64,

        /// Search radius in meters
        #[arg(long, default_value_t = SearchArea::default().radius_m)]
        radius: u32,

        /// Cuisine tag to match
        #[arg(long, default_value_t = PlaceFilter::default().cuisine)]
        cuisine: String,

        /// Overpass interpreter endpoint
        #[arg(long, env = "PWATCH_OVERPASS_URL", default_value_t = OverpassConfig::default().endpoint)]
        endpoint: String,
    },

    /// Show health and the latest poll of a running watcher
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_config = config::Config::load()?;

    let format = match cli.format {
        Some(format) => format,
        None => file_config.format()?.unwrap_or_default(),
    };
    let stats = StatsStore::new(
        cli.stats_file
            .or(file_config.stats_file)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATS_FILE)),
    );
    let ledger = PlaceLedger::new(
        cli.known_file
            .or(file_config.known_file)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_FILE)),
    );
    let api_url = cli
        .api_url
        .or(file_config.api_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    // Execute command
    match cli.command {
        Commands::History { limit } => {
            history::show_history(&stats, limit, format)?;
        }
        Commands::Check {
            threshold,
            period,
            window,
            no_robust,
        } => {
            let detector = DetectorConfig {
                threshold,
                period,
                robust: !no_robust,
                ..DetectorConfig::default()
            };
            check::run_check(&stats, detector, window, format)?;
        }
        Commands::Places {
            latitude,
            longitude,
            radius,
            cuisine,
            endpoint,
        } => {
            let area = SearchArea {
                latitude,
                longitude,
                radius_m: radius,
            };
            let filter = PlaceFilter {
                cuisine,
                ..PlaceFilter::default()
            };
            let overpass = OverpassConfig {
                endpoint,
                ..OverpassConfig::default()
            };
            places::list_places(overpass, area, filter, &ledger, format).await?;
        }
        Commands::Status => {
            let client = client::ApiClient::new(&api_url)?;
            status::show_status(&client, format).await?;
        }
    }

    Ok(())
}
