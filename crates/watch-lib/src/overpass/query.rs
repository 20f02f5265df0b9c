//! Overpass QL query construction

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Circle around a fixed location to search in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchArea {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: u32,
}

impl Default for SearchArea {
    fn default() -> Self {
        // The Pentagon
        Self {
            latitude: 38.8719,
            longitude: -77.0563,
            radius_m: 2000,
        }
    }
}

/// Tag filter selecting the places to count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceFilter {
    pub cuisine: String,
    pub amenities: Vec<String>,
}

impl Default for PlaceFilter {
    fn default() -> Self {
        Self {
            cuisine: "pizza".to_string(),
            amenities: vec!["restaurant".to_string(), "fast_food".to_string()],
        }
    }
}

const ELEMENT_KINDS: [&str; 3] = ["node", "way", "relation"];

/// Build the Overpass QL union query for `filter` inside `area`
pub fn build_query(area: &SearchArea, filter: &PlaceFilter, timeout_secs: u64) -> String {
    let around = format!(
        "(around:{},{},{})",
        area.radius_m, area.latitude, area.longitude
    );
    let cuisine = format!("[\"cuisine\"=\"{}\"]", escape(&filter.cuisine));

    let mut query = format!("[out:json][timeout:{}];\n(\n", timeout_secs);

    for kind in ELEMENT_KINDS {
        let _ = writeln!(query, "  {kind}{cuisine}{around};");
    }
    for amenity in &filter.amenities {
        let amenity = format!("[\"amenity\"=\"{}\"]", escape(amenity));
        for kind in ELEMENT_KINDS {
            let _ = writeln!(query, "  {kind}{amenity}{cuisine}{around};");
        }
    }

    query.push_str(");\nout center;\n");
    query
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
