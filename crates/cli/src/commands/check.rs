//! Offline anomaly check over the stats log

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use watch_lib::anomaly::{AnomalyDetector, Detection, DetectorConfig};
use watch_lib::store::StatsStore;

use crate::output::{color_score, print_heading, print_json, print_success, print_warning, OutputFormat};

/// Result of a check, as printed in JSON mode
#[derive(Debug, Serialize)]
struct CheckReport {
    samples: usize,
    required_samples: usize,
    latest_ratio: Option<f64>,
    detection: Option<Detection>,
}

/// Score the latest recorded ratio against the preceding `window` ratios
pub fn run_check(
    stats: &StatsStore,
    config: DetectorConfig,
    window: usize,
    format: OutputFormat,
) -> Result<()> {
    let ratios = stats
        .load_ratios(window)
        .with_context(|| format!("Failed to read {}", stats.path().display()))?;

    let detector = AnomalyDetector::new(config);
    let report = CheckReport {
        samples: ratios.len(),
        required_samples: detector.min_samples(),
        latest_ratio: ratios.last().copied(),
        detection: detector.detect(&ratios),
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report, detector.config()),
    }

    Ok(())
}

fn print_report(report: &CheckReport, config: &DetectorConfig) {
    print_heading("Anomaly Check", 50);
    println!("Samples:                {}", report.samples);
    println!("Period:                 {}", config.period);
    println!("Threshold:              {:.2}", config.threshold);
    println!();

    let Some(detection) = &report.detection else {
        if report.samples < report.required_samples {
            print_warning(&format!(
                "Not enough history: {} of {} samples",
                report.samples, report.required_samples
            ));
        } else {
            print_warning("Ratios are flat; nothing to score");
        }
        return;
    };

    println!("Latest ratio:           {:.2}", detection.value);
    println!("Expected:               {:.2}", detection.expected);
    println!(
        "Score:                  {}",
        color_score(detection.score, detection.threshold)
    );
    println!();

    if detection.anomalous {
        println!(
            "{} {} ({:+.0}% vs expected)",
            "ANOMALY".red().bold(),
            detection.severity(),
            detection.percentage_above_expected()
        );
    } else {
        print_success("Latest ratio is within the expected range");
    }
}
