//! One-shot Overpass query

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;
use watch_lib::overpass::{OverpassClient, OverpassConfig, PlaceFilter, PlaceSource, SearchArea};
use watch_lib::store::PlaceLedger;
use watch_lib::Place;

use crate::output::{print_info, print_json, print_table, print_warning, OutputFormat};

/// Row for the places table
#[derive(Tabled)]
struct PlaceRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Latitude")]
    latitude: String,
    #[tabled(rename = "Longitude")]
    longitude: String,
    #[tabled(rename = "New")]
    new: String,
}

#[derive(Debug, Serialize)]
struct ListedPlace {
    #[serde(flatten)]
    place: Place,
    new: bool,
}

/// Fetch places once and mark the ones missing from the ledger
///
/// The ledger is only read; the watcher owns it.
pub async fn list_places(
    overpass: OverpassConfig,
    area: SearchArea,
    filter: PlaceFilter,
    ledger: &PlaceLedger,
    format: OutputFormat,
) -> Result<()> {
    let client = OverpassClient::new(overpass, area, filter)
        .context("Failed to create Overpass client")?;
    let places = client
        .fetch_places()
        .await
        .with_context(|| format!("Overpass query against {} failed", client.endpoint()))?;
    let known = ledger
        .load()
        .with_context(|| format!("Failed to read {}", ledger.path().display()))?;

    let listed: Vec<ListedPlace> = places
        .into_iter()
        .map(|place| ListedPlace {
            new: !known.contains(&place.id),
            place,
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&listed)?,
        OutputFormat::Table => {
            if listed.is_empty() {
                print_warning(&format!(
                    "No places found within {} m of {},{}",
                    area.radius_m, area.latitude, area.longitude
                ));
                return Ok(());
            }

            let new_count = listed.iter().filter(|p| p.new).count();
            let rows: Vec<PlaceRow> = listed
                .iter()
                .map(|p| PlaceRow {
                    id: p.place.id.to_string(),
                    name: p.place.name.clone(),
                    latitude: format_coordinate(p.place.latitude),
                    longitude: format_coordinate(p.place.longitude),
                    new: if p.new {
                        "new".green().to_string()
                    } else {
                        String::new()
                    },
                })
                .collect();

            print_table(rows);
            print_info(&format!(
                "{} places, {} not in {}",
                listed.len(),
                new_count,
                ledger.path().display()
            ));
        }
    }

    Ok(())
}

fn format_coordinate(value: Option<f64>) -> String {
    value.map(|v| format!("{:.5}", v)).unwrap_or_else(|| "-".to_string())
}
