//! Core library for the pizza watcher
//!
//! This crate provides the core functionality for:
//! - Querying the Overpass API for pizza places around a fixed location
//! - Turning each poll into a visits-per-place observation
//! - Seasonal anomaly detection over the observation history
//! - Persisting observations and the set of known places
//! - Health checks and observability

pub mod anomaly;
pub mod error;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod overpass;
pub mod store;
pub mod visits;

pub use error::{Result, WatchError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, WatchMetrics};
