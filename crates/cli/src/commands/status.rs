//! Status of a running watcher

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;
use watch_lib::monitor::CycleReport;
use watch_lib::HealthResponse;

use crate::client::ApiClient;
use crate::output::{
    color_score, color_status, print_heading, print_json, print_table, print_warning, OutputFormat,
};

/// Row for the component table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    health: HealthResponse,
    latest: Option<CycleReport>,
}

/// Show health and the latest poll report
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (_, HealthResponse) = client.get_with_status("healthz").await?;
    let latest: Option<CycleReport> = client.get_optional("api/v1/status").await?;
    let report = StatusReport { health, latest };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }

    Ok(())
}

fn print_report(report: &StatusReport) {
    let health = &report.health;

    print_heading("Watcher Status", 50);
    println!("Status:                 {}", color_status(health.status.as_str()));
    println!("Polls completed:        {}", health.polls_completed);
    if let Some(ts) = health.last_poll_timestamp {
        println!("Last poll:              {}", format_unix(ts));
    }
    println!();

    if !health.components.is_empty() {
        let mut names: Vec<&String> = health.components.keys().collect();
        names.sort();
        let rows: Vec<ComponentRow> = names
            .into_iter()
            .map(|name| {
                let component = &health.components[name];
                ComponentRow {
                    name: name.clone(),
                    status: color_status(component.status.as_str()),
                    message: component.message.clone().unwrap_or_default(),
                }
            })
            .collect();
        print_table(rows);
        println!();
    }

    let Some(latest) = &report.latest else {
        print_warning("No poll completed yet");
        return;
    };

    println!("{}", "Latest Poll".bold());
    println!("{}", "-".repeat(50));
    let obs = &latest.observation;
    println!("Timestamp:              {}", obs.formatted_timestamp());
    println!("Pizzerias:              {}", obs.places);
    println!("Visits:                 {}", obs.visits);
    println!("Ratio:                  {:.2}", obs.ratio);
    match &latest.detection {
        Some(d) => {
            println!(
                "Score:                  {}",
                color_score(d.score, d.threshold)
            );
            if d.anomalous {
                println!("{}", "ANOMALY".red().bold());
            }
        }
        None => println!(
            "Score:                  - ({} samples in history)",
            latest.history_samples
        ),
    }
    if !latest.new_places.is_empty() {
        let names: Vec<&str> = latest.new_places.iter().map(|p| p.name.as_str()).collect();
        println!("New places:             {}", names.join(", ").cyan());
    }
}

/// Format a unix timestamp as local time
fn format_unix(ts: i64) -> String {
    match chrono::DateTime::from_timestamp(ts, 0) {
        Some(dt) => dt
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => ts.to_string(),
    }
}
