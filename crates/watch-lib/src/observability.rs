//! Observability infrastructure for the watcher
//!
//! Provides:
//! - Prometheus metrics (poll latency, place counts, ratio, anomaly score)
//! - Structured logging of domain events with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

use crate::anomaly::Detection;
use crate::models::Observation;
use crate::store::PlaceDiff;

/// Histogram buckets for Overpass poll latency (in seconds)
const POLL_LATENCY_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 60.0, 120.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<WatchMetricsInner> = OnceLock::new();

struct WatchMetricsInner {
    poll_latency_seconds: Histogram,
    places_tracked: IntGauge,
    visits: IntGauge,
    visit_ratio: Gauge,
    anomaly_score: Gauge,
    history_samples: IntGauge,
    anomalies_detected: IntCounter,
    poll_errors: IntCounter,
    new_places: IntCounter,
    alerts_sent: IntCounter,
    alert_errors: IntCounter,
}

impl WatchMetricsInner {
    fn new() -> Self {
        Self {
            poll_latency_seconds: register_histogram!(
                "pizza_watch_poll_latency_seconds",
                "Time spent querying the Overpass API",
                POLL_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register poll_latency_seconds"),

            places_tracked: register_int_gauge!(
                "pizza_watch_places",
                "Number of pizza places found by the latest poll"
            )
            .expect("Failed to register places"),

            visits: register_int_gauge!(
                "pizza_watch_visits",
                "Estimated visits across all places in the latest poll"
            )
            .expect("Failed to register visits"),

            visit_ratio: register_gauge!(
                "pizza_watch_visit_ratio",
                "Visits per place in the latest poll"
            )
            .expect("Failed to register visit_ratio"),

            anomaly_score: register_gauge!(
                "pizza_watch_anomaly_score",
                "Residual score of the latest ratio"
            )
            .expect("Failed to register anomaly_score"),

            history_samples: register_int_gauge!(
                "pizza_watch_history_samples",
                "Number of ratios in the detection window"
            )
            .expect("Failed to register history_samples"),

            anomalies_detected: register_int_counter!(
                "pizza_watch_anomalies_detected_total",
                "Total number of anomalous ratios"
            )
            .expect("Failed to register anomalies_detected"),

            poll_errors: register_int_counter!(
                "pizza_watch_poll_errors_total",
                "Total number of failed polls"
            )
            .expect("Failed to register poll_errors"),

            new_places: register_int_counter!(
                "pizza_watch_new_places_total",
                "Total number of newly seen places"
            )
            .expect("Failed to register new_places"),

            alerts_sent: register_int_counter!(
                "pizza_watch_alerts_sent_total",
                "Total number of alerts delivered to the webhook"
            )
            .expect("Failed to register alerts_sent"),

            alert_errors: register_int_counter!(
                "pizza_watch_alert_errors_total",
                "Total number of failed alert deliveries"
            )
            .expect("Failed to register alert_errors"),
        }
    }
}

/// Watcher metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics; clones share the same metrics.
#[derive(Clone)]
pub struct WatchMetrics {
    _private: (),
}

impl Default for WatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(WatchMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WatchMetricsInner {
        GLOBAL_METRICS.get_or_init(WatchMetricsInner::new)
    }

    pub fn observe_poll_latency(&self, duration_secs: f64) {
        self.inner().poll_latency_seconds.observe(duration_secs);
    }

    /// Update the gauges describing the latest observation
    pub fn record_observation(&self, observation: &Observation) {
        let inner = self.inner();
        inner.places_tracked.set(observation.places as i64);
        inner.visits.set(observation.visits as i64);
        inner.visit_ratio.set(observation.ratio);
    }

    pub fn record_detection(&self, detection: Option<&Detection>, history_samples: usize) {
        let inner = self.inner();
        inner.history_samples.set(history_samples as i64);
        inner
            .anomaly_score
            .set(detection.map(|d| d.score).unwrap_or(0.0));
        if detection.map(|d| d.anomalous).unwrap_or(false) {
            inner.anomalies_detected.inc();
        }
    }

    pub fn inc_poll_errors(&self) {
        self.inner().poll_errors.inc();
    }

    pub fn add_new_places(&self, count: usize) {
        self.inner().new_places.inc_by(count as u64);
    }

    pub fn inc_alerts_sent(&self) {
        self.inner().alerts_sent.inc();
    }

    pub fn inc_alert_errors(&self) {
        self.inner().alert_errors.inc();
    }
}

/// Structured logger for watcher events
///
/// Messages are human-readable for the plain-text log file; the fields
/// carry the same data for JSON output.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str, location: &str, history_samples: usize) {
        info!(
            event = "watcher_started",
            instance = %self.instance,
            version = %version,
            location = %location,
            history_samples = history_samples,
            "Pizza watcher started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "watcher_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Program exited gracefully"
        );
    }

    pub fn log_observation(&self, observation: &Observation) {
        info!(
            event = "observation_recorded",
            instance = %self.instance,
            timestamp = %observation.formatted_timestamp(),
            places = observation.places,
            visits = observation.visits,
            ratio = observation.ratio,
            "[{}] Pizzerias: {}, Visits: {}, Ratio: {:.2}",
            observation.formatted_timestamp(),
            observation.places,
            observation.visits,
            observation.ratio
        );
    }

    pub fn log_score(&self, detection: Option<&Detection>, history_samples: usize) {
        match detection {
            Some(d) => info!(
                event = "anomaly_scored",
                instance = %self.instance,
                score = d.score,
                expected = d.expected,
                residual = d.residual,
                samples = d.samples,
                "Anomaly detection score: {:.2}",
                d.score
            ),
            None => info!(
                event = "anomaly_scored",
                instance = %self.instance,
                samples = history_samples,
                "Anomaly detection score: 0.00 (not enough history)"
            ),
        }
    }

    pub fn log_places_changed(&self, diff: &PlaceDiff) {
        if !diff.added.is_empty() {
            let ids: Vec<String> = diff.added.iter().map(|p| p.id.to_string()).collect();
            let names: Vec<&str> = diff.added.iter().map(|p| p.name.as_str()).collect();
            info!(
                event = "places_changed",
                instance = %self.instance,
                added = diff.added.len(),
                names = ?names,
                "New pizzerias detected: {}",
                ids.join(", ")
            );
        }
        if !diff.removed.is_empty() {
            let ids: Vec<String> = diff.removed.iter().map(|id| id.to_string()).collect();
            info!(
                event = "places_changed",
                instance = %self.instance,
                removed = diff.removed.len(),
                "Pizzerias no longer found: {}",
                ids.join(", ")
            );
        }
    }

    pub fn log_anomaly(&self, detection: &Detection, observation: &Observation) {
        warn!(
            event = "anomaly_detected",
            instance = %self.instance,
            severity = %detection.severity(),
            score = detection.score,
            ratio = observation.ratio,
            expected = detection.expected,
            threshold = detection.threshold,
            "{}",
            crate::anomaly::alert_message(detection, observation)
        );
    }

    pub fn log_poll_failed(&self, stage: &str, error: &dyn std::error::Error) {
        error!(
            event = "poll_failed",
            instance = %self.instance,
            stage = %stage,
            error = %error,
            "Poll failed during {}: {}",
            stage,
            error
        );
    }

    pub fn log_alert_delivery(&self, target: &str, result: Result<(), &dyn std::error::Error>) {
        match result {
            Ok(()) => info!(
                event = "alert_delivered",
                instance = %self.instance,
                target = %target,
                "Alert delivered"
            ),
            Err(e) => warn!(
                event = "alert_delivery_failed",
                instance = %self.instance,
                target = %target,
                error = %e,
                "Failed to deliver alert: {}",
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_watch_metrics_updates() {
        let metrics = WatchMetrics::new();
        let ts = NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        metrics.observe_poll_latency(0.8);
        metrics.record_observation(&Observation::new(ts, 5, 40));
        metrics.record_detection(None, 12);
        metrics.inc_poll_errors();
        metrics.add_new_places(2);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "pizza_watch_visit_ratio"));
    }

    #[test]
    fn test_metrics_handles_share_registry() {
        let a = WatchMetrics::new();
        let b = a.clone();
        a.inc_alerts_sent();
        b.inc_alerts_sent();
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-instance");
        assert_eq!(logger.instance(), "test-instance");
    }
}
