//! Core data models for the watcher

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::WatchError;

/// Timestamp format used in logs and the stats file
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// OpenStreetMap element kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Node => "node",
            ElementKind::Way => "way",
            ElementKind::Relation => "relation",
        }
    }
}

/// Stable identifier of a place, e.g. `node/123`
///
/// OSM ids are only unique per element kind, so the kind is part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlaceId {
    pub kind: ElementKind,
    pub id: i64,
}

impl PlaceId {
    pub fn new(kind: ElementKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for PlaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for PlaceId {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| WatchError::InvalidPlaceId(s.to_string()))?;

        let kind = match kind {
            "node" => ElementKind::Node,
            "way" => ElementKind::Way,
            "relation" => ElementKind::Relation,
            _ => return Err(WatchError::InvalidPlaceId(s.to_string())),
        };
        let id = id
            .parse()
            .map_err(|_| WatchError::InvalidPlaceId(s.to_string()))?;

        Ok(Self { kind, id })
    }
}

/// A pizza place returned by the Overpass API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: PlaceId,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub name: String,
}

/// One poll turned into a scalar observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub places: usize,
    pub visits: u64,
    /// Visits per place, `0.0` when no place was found
    pub ratio: f64,
}

impl Observation {
    pub fn new(timestamp: NaiveDateTime, places: usize, visits: u64) -> Self {
        let ratio = if places > 0 {
            visits as f64 / places as f64
        } else {
            0.0
        };

        Self {
            timestamp,
            places,
            visits,
            ratio,
        }
    }

    /// Observation stamped with the current local time at second precision
    pub fn now(places: usize, visits: u64) -> Self {
        let now = chrono::Local::now().naive_local();
        Self::new(now.with_nanosecond(0).unwrap_or(now), places, visits)
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Observation as read back from the stats log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    #[serde(flatten)]
    pub observation: Observation,
    /// Missing for polls without enough history, and in older files
    pub score: Option<f64>,
    pub anomaly: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_place_id_round_trips_through_display() {
        let id = PlaceId::new(ElementKind::Way, 4242);
        assert_eq!(id.to_string(), "way/4242");
        assert_eq!("way/4242".parse::<PlaceId>().unwrap(), id);
    }

    #[test]
    fn test_place_id_rejects_garbage() {
        assert!("4242".parse::<PlaceId>().is_err());
        assert!("area/1".parse::<PlaceId>().is_err());
        assert!("node/abc".parse::<PlaceId>().is_err());
    }

    #[test]
    fn test_observation_ratio() {
        let obs = Observation::new(ts(), 4, 30);
        assert!((obs.ratio - 7.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_observation_ratio_without_places() {
        let obs = Observation::new(ts(), 0, 0);
        assert_eq!(obs.ratio, 0.0);
    }

    #[test]
    fn test_observation_timestamp_format() {
        let obs = Observation::new(ts(), 1, 3);
        assert_eq!(obs.formatted_timestamp(), "2025-06-01 12:00:00");
    }
}
