//! Configuration management for the CLI
//!
//! Values in `~/.config/pwatch/config.json` act as defaults; flags and
//! environment variables win over them.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Watcher API endpoint URL
    pub api_url: Option<String>,
    /// Stats log to read
    pub stats_file: Option<PathBuf>,
    /// Known-places ledger to compare against
    pub known_file: Option<PathBuf>,
    /// Default output format (`table` or `json`)
    pub default_format: Option<String>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from `path`; a missing file gives the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Output format from the config file, if it names a valid one
    pub fn format(&self) -> Result<Option<OutputFormat>> {
        self.default_format
            .as_deref()
            .map(|f| {
                OutputFormat::from_str(f, true)
                    .map_err(|e| anyhow::anyhow!("Invalid default_format in config: {}", e))
            })
            .transpose()
    }

    /// Get the configuration file path
    fn config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".config").join("pwatch").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_is_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert!(config.api_url.is_none());
        assert!(config.format().unwrap().is_none());
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"api_url": "http://watcher:8080", "stats_file": "/var/lib/pizza/stats.csv", "default_format": "json"}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api_url.as_deref(), Some("http://watcher:8080"));
        assert_eq!(
            config.stats_file,
            Some(PathBuf::from("/var/lib/pizza/stats.csv"))
        );
        assert_eq!(config.format().unwrap(), Some(OutputFormat::Json));
    }

    #[test]
    fn test_invalid_format_rejected() {
        let config = Config {
            default_format: Some("yaml".to_string()),
            ..Config::default()
        };
        assert!(config.format().is_err());
    }

    #[test]
    fn test_malformed_config_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
