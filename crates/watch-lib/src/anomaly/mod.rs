//! Anomaly detection for visit ratios
//!
//! This module provides:
//! - A rolling ratio history seeded from the stats log
//! - STL seasonal-trend decomposition
//! - Residual-based spike detection on the newest ratio
//! - Alert emission to an Alertmanager-compatible webhook

mod alerter;
mod detector;
mod history;
mod stl;

pub use alerter::{
    alert_message, AlertContext, AlertSeverity, AlertType, Alerter, AlertmanagerAlert,
    AlertmanagerPayload, WebhookNotifier,
};
pub use detector::{AnomalyDetector, Detection, DetectorConfig, Severity, DEFAULT_PERIOD};
pub use history::{RatioHistory, DEFAULT_HISTORY_CAPACITY};
pub use stl::{Decomposition, Stl, DEFAULT_SEASONAL_SPAN};
