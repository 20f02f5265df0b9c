//! Place discovery through the Overpass API
//!
//! Builds Overpass QL queries for pizza places around a search area and
//! turns the JSON response into deduplicated [`Place`] values.

mod client;
mod query;

pub use client::{OverpassClient, OverpassConfig, OverpassResponse};
pub use query::{build_query, PlaceFilter, SearchArea};

use crate::error::Result;
use crate::models::Place;

pub use async_trait::async_trait;

/// Source of the current set of places around the watched location
#[async_trait]
pub trait PlaceSource: Send + Sync {
    /// Fetch every matching place, deduplicated by id
    async fn fetch_places(&self) -> Result<Vec<Place>>;
}
