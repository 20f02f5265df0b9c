//! Pizza watcher daemon
//!
//! Polls the Overpass API on a fixed schedule, scores the visits-per-place
//! ratio for anomalies and serves health, metrics and status over HTTP.

pub mod api;
pub mod config;
pub mod logging;
