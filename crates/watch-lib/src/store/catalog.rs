//! In-memory catalog of the places found by the latest poll

use std::collections::BTreeSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Place, PlaceId};

/// Places gained and lost between two polls
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceDiff {
    pub added: Vec<Place>,
    pub removed: Vec<PlaceId>,
}

impl PlaceDiff {
    /// Compare the current places against the previously known ids
    pub fn between(known: &BTreeSet<PlaceId>, current: &[Place]) -> Self {
        let current_ids: BTreeSet<PlaceId> = current.iter().map(|p| p.id).collect();

        let added = current
            .iter()
            .filter(|p| !known.contains(&p.id))
            .cloned()
            .collect();
        let removed = known.difference(&current_ids).copied().collect();

        Self { added, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Concurrent view of the current places, read by the HTTP API
#[derive(Debug, Default)]
pub struct PlaceCatalog {
    places: DashMap<PlaceId, Place>,
}

impl PlaceCatalog {
    pub fn new() -> Self {
        Self {
            places: DashMap::new(),
        }
    }

    /// Replace the catalog contents with the latest poll
    pub fn replace(&self, places: &[Place]) {
        let keep: BTreeSet<PlaceId> = places.iter().map(|p| p.id).collect();
        self.places.retain(|id, _| keep.contains(id));
        for place in places {
            self.places.insert(place.id, place.clone());
        }
        debug!(places = self.places.len(), "Place catalog refreshed");
    }

    pub fn get(&self, id: &PlaceId) -> Option<Place> {
        self.places.get(id).map(|r| r.clone())
    }

    /// All places ordered by id
    pub fn list(&self) -> Vec<Place> {
        let mut places: Vec<Place> = self.places.iter().map(|r| r.value().clone()).collect();
        places.sort_by_key(|p| p.id);
        places
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }
}
