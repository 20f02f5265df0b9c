//! Watcher configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use watch_lib::anomaly::DetectorConfig;
use watch_lib::overpass::{OverpassConfig, PlaceFilter, SearchArea};

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "PIZZA_WATCH_CONFIG";

/// Prefix for per-field environment overrides (`PIZZA_WATCH_LATITUDE`, ...)
pub const ENV_PREFIX: &str = "PIZZA_WATCH";

/// Watcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Instance name used in logs and alert labels
    #[serde(default = "default_instance")]
    pub instance: String,

    #[serde(default = "default_latitude")]
    pub latitude: f64,

    #[serde(default = "default_longitude")]
    pub longitude: f64,

    /// Search radius in meters
    #[serde(default = "default_radius")]
    pub radius_m: u32,

    #[serde(default = "default_cuisine")]
    pub cuisine: String,

    /// Overpass interpreter endpoint
    #[serde(default = "default_overpass_url")]
    pub overpass_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Poll interval in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Maximum random delay added to each interval
    #[serde(default)]
    pub jitter_secs: u64,

    #[serde(default = "default_stats_file")]
    pub stats_file: PathBuf,

    #[serde(default = "default_known_places_file")]
    pub known_places_file: PathBuf,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Anomaly score threshold
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Seasonal period in polls
    #[serde(default = "default_period")]
    pub period: usize,

    #[serde(default = "default_seasonal_span")]
    pub seasonal_span: usize,

    #[serde(default = "default_robust")]
    pub robust: bool,

    /// Number of ratios kept for detection
    #[serde(default = "default_window")]
    pub window: usize,

    #[serde(default = "default_min_visits")]
    pub min_visits: u64,

    #[serde(default = "default_max_visits")]
    pub max_visits: u64,

    /// Alertmanager-compatible webhook; alerts are only logged when unset
    #[serde(default)]
    pub alert_webhook_url: Option<String>,

    #[serde(default = "default_alert_timeout")]
    pub alert_timeout_secs: u64,

    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "pizza-watcher".to_string())
}

fn default_latitude() -> f64 {
    SearchArea::default().latitude
}

fn default_longitude() -> f64 {
    SearchArea::default().longitude
}

fn default_radius() -> u32 {
    SearchArea::default().radius_m
}

fn default_cuisine() -> String {
    PlaceFilter::default().cuisine
}

fn default_overpass_url() -> String {
    OverpassConfig::default().endpoint
}

fn default_request_timeout() -> u64 {
    30
}

fn default_query_timeout() -> u64 {
    25
}

fn default_max_retries() -> u32 {
    2
}

fn default_interval() -> u64 {
    3600
}

fn default_stats_file() -> PathBuf {
    PathBuf::from(watch_lib::monitor::DEFAULT_STATS_FILE)
}

fn default_known_places_file() -> PathBuf {
    PathBuf::from(watch_lib::monitor::DEFAULT_LEDGER_FILE)
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs.txt")
}

fn default_api_port() -> u16 {
    8080
}

fn default_threshold() -> f64 {
    3.0
}

fn default_period() -> usize {
    24
}

fn default_seasonal_span() -> usize {
    7
}

fn default_robust() -> bool {
    true
}

fn default_window() -> usize {
    72
}

fn default_min_visits() -> u64 {
    3
}

fn default_max_visits() -> u64 {
    15
}

fn default_alert_timeout() -> u64 {
    10
}

fn default_dedup_window() -> u64 {
    900
}

impl WatcherConfig {
    /// Load configuration from the environment and the optional config file
    pub fn load() -> Result<Self> {
        let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    /// Load configuration with an explicit config file
    ///
    /// Environment variables override values from the file.
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read watcher configuration")?;

        let parsed: WatcherConfig = config
            .try_deserialize()
            .context("Invalid watcher configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject settings the monitor cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            bail!("latitude {} is out of range", self.latitude);
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            bail!("longitude {} is out of range", self.longitude);
        }
        if self.radius_m == 0 {
            bail!("radius_m must be positive");
        }
        if self.interval_secs == 0 {
            bail!("interval_secs must be positive");
        }
        if self.period < 2 {
            bail!("period must be at least 2");
        }
        if self.window < 2 * self.period {
            bail!(
                "window ({}) must hold at least two periods ({})",
                self.window,
                2 * self.period
            );
        }
        if self.threshold <= 0.0 || !self.threshold.is_finite() {
            bail!("threshold must be a positive number");
        }
        Ok(())
    }

    pub fn search_area(&self) -> SearchArea {
        SearchArea {
            latitude: self.latitude,
            longitude: self.longitude,
            radius_m: self.radius_m,
        }
    }

    pub fn place_filter(&self) -> PlaceFilter {
        PlaceFilter {
            cuisine: self.cuisine.clone(),
            ..PlaceFilter::default()
        }
    }

    pub fn overpass_config(&self) -> OverpassConfig {
        OverpassConfig {
            endpoint: self.overpass_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            query_timeout_secs: self.query_timeout_secs,
            max_retries: self.max_retries,
            ..OverpassConfig::default()
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            threshold: self.threshold,
            period: self.period,
            seasonal_span: self.seasonal_span,
            robust: self.robust,
        }
    }

    /// Location as `lat,lon`
    pub fn location(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}
