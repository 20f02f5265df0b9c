//! Persistence for observations and known places

mod catalog;
mod ledger;
mod stats;

pub use catalog::{PlaceCatalog, PlaceDiff};
pub use ledger::PlaceLedger;
pub use stats::{StatsStore, STATS_HEADER};
