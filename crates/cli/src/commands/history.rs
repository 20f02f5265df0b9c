//! Observation history

use anyhow::{Context, Result};
use tabled::Tabled;
use watch_lib::store::StatsStore;

use crate::output::{format_anomaly, format_score, print_json, print_table, print_warning, OutputFormat};

/// Row for the history table
#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Pizzerias")]
    places: usize,
    #[tabled(rename = "Visits")]
    visits: u64,
    #[tabled(rename = "Ratio")]
    ratio: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Anomaly")]
    anomaly: String,
}

/// Show the newest `limit` observations, oldest first
pub fn show_history(stats: &StatsStore, limit: usize, format: OutputFormat) -> Result<()> {
    let records = stats
        .load_records(limit)
        .with_context(|| format!("Failed to read {}", stats.path().display()))?;

    match format {
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Table => {
            if records.is_empty() {
                print_warning(&format!(
                    "No observations recorded in {}",
                    stats.path().display()
                ));
                return Ok(());
            }

            let anomalies = records
                .iter()
                .filter(|r| r.anomaly == Some(true))
                .count();

            let rows: Vec<HistoryRow> = records
                .iter()
                .map(|r| HistoryRow {
                    timestamp: r.observation.formatted_timestamp(),
                    places: r.observation.places,
                    visits: r.observation.visits,
                    ratio: format!("{:.2}", r.observation.ratio),
                    score: format_score(r.score),
                    anomaly: format_anomaly(r.anomaly),
                })
                .collect();

            print_table(rows);
            println!("{} observations, {} anomalous", records.len(), anomalies);
        }
    }

    Ok(())
}
