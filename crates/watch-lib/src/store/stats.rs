//! Append-only CSV log of observations
//!
//! One row per poll. Columns are looked up by header name when reading,
//! so files written before the score columns existed still load.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::anomaly::Detection;
use crate::error::{Result, WatchError};
use crate::models::{Observation, ObservationRecord, TIMESTAMP_FORMAT};

pub const COL_TIMESTAMP: &str = "Timestamp";
pub const COL_PLACES: &str = "Pizzerias";
pub const COL_VISITS: &str = "Visits";
pub const COL_RATIO: &str = "Visit/Pizzeria Ratio";
pub const COL_SCORE: &str = "Anomaly Score";
pub const COL_ANOMALY: &str = "Anomaly";

/// Header row written to new files
pub const STATS_HEADER: [&str; 6] = [
    COL_TIMESTAMP,
    COL_PLACES,
    COL_VISITS,
    COL_RATIO,
    COL_SCORE,
    COL_ANOMALY,
];

/// CSV-backed observation log
#[derive(Debug, Clone)]
pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one observation, writing the header first for a new file
    pub fn append(&self, observation: &Observation, detection: Option<&Detection>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| WatchError::io(parent, e))?;
            }
        }

        let needs_header = fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        if !needs_header {
            self.upgrade_header()?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| WatchError::io(&self.path, e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            writer.write_record(STATS_HEADER)?;
        }

        writer.write_record([
            observation.formatted_timestamp(),
            observation.places.to_string(),
            observation.visits.to_string(),
            format!("{:.2}", observation.ratio),
            detection
                .map(|d| format!("{:.2}", d.score))
                .unwrap_or_default(),
            detection
                .map(|d| d.anomalous.to_string())
                .unwrap_or_default(),
        ])?;
        writer.flush().map_err(|e| WatchError::io(&self.path, e))?;

        Ok(())
    }

    /// Load the newest `limit` ratios, oldest first
    ///
    /// Rows whose ratio does not parse are skipped; a missing file is empty.
    pub fn load_ratios(&self, limit: usize) -> Result<Vec<f64>> {
        let Some(mut reader) = self.open_reader()? else {
            return Ok(Vec::new());
        };

        let headers = reader.headers()?.clone();
        let Some(ratio_idx) = column(&headers, COL_RATIO) else {
            debug!(path = %self.path.display(), "Stats file has no ratio column");
            return Ok(Vec::new());
        };

        let mut ratios = Vec::new();
        for row in reader.records() {
            let row = row?;
            if let Some(ratio) = row.get(ratio_idx).and_then(|v| v.trim().parse::<f64>().ok()) {
                ratios.push(ratio);
            }
        }

        Ok(tail(ratios, limit))
    }

    /// Load the newest `limit` complete records, oldest first
    pub fn load_records(&self, limit: usize) -> Result<Vec<ObservationRecord>> {
        let Some(mut reader) = self.open_reader()? else {
            return Ok(Vec::new());
        };

        let headers = reader.headers()?.clone();
        let (Some(ts_idx), Some(places_idx), Some(visits_idx), Some(ratio_idx)) = (
            column(&headers, COL_TIMESTAMP),
            column(&headers, COL_PLACES),
            column(&headers, COL_VISITS),
            column(&headers, COL_RATIO),
        ) else {
            return Ok(Vec::new());
        };
        let score_idx = column(&headers, COL_SCORE);
        let anomaly_idx = column(&headers, COL_ANOMALY);

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            let field = |idx: usize| row.get(idx).map(str::trim).unwrap_or("");

            let parsed = (
                NaiveDateTime::parse_from_str(field(ts_idx), TIMESTAMP_FORMAT).ok(),
                field(places_idx).parse::<usize>().ok(),
                field(visits_idx).parse::<u64>().ok(),
                field(ratio_idx).parse::<f64>().ok(),
            );
            let (Some(timestamp), Some(places), Some(visits), Some(ratio)) = parsed else {
                continue;
            };

            records.push(ObservationRecord {
                observation: Observation {
                    timestamp,
                    places,
                    visits,
                    ratio,
                },
                score: score_idx.and_then(|i| field(i).parse().ok()),
                anomaly: anomaly_idx.and_then(|i| field(i).parse().ok()),
            });
        }

        Ok(tail(records, limit))
    }

    /// Extend a header written before the score columns existed
    ///
    /// Old rows keep four fields and read back with empty scores.
    fn upgrade_header(&self) -> Result<()> {
        let mut first = String::new();
        {
            let file = fs::File::open(&self.path).map_err(|e| WatchError::io(&self.path, e))?;
            BufReader::new(file)
                .read_line(&mut first)
                .map_err(|e| WatchError::io(&self.path, e))?;
        }
        let header: Vec<&str> = first.trim_end().split(',').map(str::trim).collect();

        if header.len() >= STATS_HEADER.len() {
            return Ok(());
        }
        if STATS_HEADER[..header.len()] != header[..] {
            warn!(
                path = %self.path.display(),
                header = %first.trim_end(),
                "Unrecognised stats header, appending without upgrade"
            );
            return Ok(());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| WatchError::io(&self.path, e))?;
        let rest = content.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
        let tmp = self.temp_path();
        let upgraded = format!("{}\n{}", STATS_HEADER.join(","), rest);
        fs::write(&tmp, upgraded).map_err(|e| WatchError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| WatchError::io(&self.path, e))?;

        info!(path = %self.path.display(), "Added score columns to stats header");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn open_reader(&self) -> Result<Option<csv::Reader<fs::File>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        Ok(Some(reader))
    }
}

fn column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

fn tail<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if items.len() > limit {
        items.drain(..items.len() - limit);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn obs(hour: u32, places: usize, visits: u64) -> Observation {
        let ts = NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap();
        Observation::new(ts, places, visits)
    }

    fn detection(score: f64) -> Detection {
        Detection {
            value: 9.0,
            expected: 8.0,
            residual: 1.0,
            residual_std: 1.0 / score,
            score,
            threshold: 3.0,
            anomalous: score > 3.0,
            samples: 48,
        }
    }

    #[test]
    fn test_append_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::new(dir.path().join("stats.csv"));

        store.append(&obs(1, 4, 30), None).unwrap();
        store.append(&obs(2, 4, 40), Some(&detection(4.25))).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "Timestamp,Pizzerias,Visits,Visit/Pizzeria Ratio,Anomaly Score,Anomaly"
        );
        assert_eq!(lines[1], "2025-06-01 01:00:00,4,30,7.50,,");
        assert_eq!(lines[2], "2025-06-01 02:00:00,4,40,10.00,4.25,true");
    }

    #[test]
    fn test_append_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::new(dir.path().join("nested/data/stats.csv"));
        store.append(&obs(1, 1, 5), None).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::new(dir.path().join("absent.csv"));
        assert!(store.load_ratios(72).unwrap().is_empty());
        assert!(store.load_records(10).unwrap().is_empty());
    }

    #[test]
    fn test_load_ratios_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::new(dir.path().join("stats.csv"));
        for hour in 0..10 {
            store.append(&obs(hour, 1, hour as u64), None).unwrap();
        }

        let ratios = store.load_ratios(3).unwrap();
        assert_eq!(ratios, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_load_ratios_skips_bad_rows_and_reads_old_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        fs::write(
            &path,
            "Timestamp,Pizzerias,Visits,Visit/Pizzeria Ratio\n\
             2025-06-01 00:00:00,3,27,9.00\n\
             2025-06-01 01:00:00,3,27,oops\n\
             2025-06-01 02:00:00,3,30,10.00\n",
        )
        .unwrap();

        let store = StatsStore::new(&path);
        assert_eq!(store.load_ratios(72).unwrap(), vec![9.0, 10.0]);

        let records = store.load_records(72).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].score, None);
        assert_eq!(records[0].anomaly, None);
    }

    #[test]
    fn test_append_upgrades_old_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        fs::write(
            &path,
            "Timestamp,Pizzerias,Visits,Visit/Pizzeria Ratio\n\
             2025-06-01 00:00:00,3,27,9.00\n",
        )
        .unwrap();

        let store = StatsStore::new(&path);
        store.append(&obs(1, 4, 40), Some(&detection(4.25))).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(
            "Timestamp,Pizzerias,Visits,Visit/Pizzeria Ratio,Anomaly Score,Anomaly\n"
        ));
        assert!(!dir.path().join("stats.csv.tmp").exists());

        let records = store.load_records(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].observation.ratio, 9.0);
        assert_eq!(records[0].score, None);
        assert_eq!(records[1].score, Some(4.25));
        assert_eq!(records[1].anomaly, Some(true));
    }

    #[test]
    fn test_append_leaves_unknown_header_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        fs::write(&path, "when,ratio\n2025-06-01 00:00:00,9.00\n").unwrap();

        StatsStore::new(&path).append(&obs(1, 1, 9), None).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("when,ratio\n"));
    }

    #[test]
    fn test_load_records_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::new(dir.path().join("stats.csv"));
        store.append(&obs(5, 2, 19), Some(&detection(1.5))).unwrap();

        let records = store.load_records(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].observation.places, 2);
        assert_eq!(records[0].observation.visits, 19);
        assert_eq!(records[0].observation.ratio, 9.5);
        assert_eq!(records[0].score, Some(1.5));
        assert_eq!(records[0].anomaly, Some(false));
    }

    #[test]
    fn test_file_without_ratio_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        fs::write(&path, "a,b\n1,2\n").unwrap();
        assert!(StatsStore::new(&path).load_ratios(72).unwrap().is_empty());
    }
}
