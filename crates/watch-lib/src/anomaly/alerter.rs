//! Alert emission for detected anomalies
//!
//! Handles:
//! - Formatting alerts for an Alertmanager-compatible webhook
//! - Deduplication of alerts within a configurable window
//! - Delivering alert payloads over HTTP

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Detection, Severity};
use crate::error::{Result, WatchError};
use crate::models::Observation;

/// Default deduplication window (15 minutes)
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 15 * 60;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

impl From<Severity> for AlertSeverity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical => AlertSeverity::Critical,
            Severity::High | Severity::Warning => AlertSeverity::Warning,
        }
    }
}

/// Alert type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Ratio far above the expected level
    RatioSpike,
    /// Ratio far below the expected level
    RatioDrop,
}

impl AlertType {
    fn for_detection(detection: &Detection) -> Self {
        if detection.residual >= 0.0 {
            AlertType::RatioSpike
        } else {
            AlertType::RatioDrop
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertType::RatioSpike => write!(f, "PizzaRatioSpike"),
            AlertType::RatioDrop => write!(f, "PizzaRatioDrop"),
        }
    }
}

/// Alertmanager webhook alert format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    /// Alert status (firing or resolved)
    pub status: String,
    /// Alert labels for routing and grouping
    pub labels: HashMap<String, String>,
    /// Alert annotations with details
    pub annotations: HashMap<String, String>,
    /// Start time in RFC3339 format
    pub starts_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
}

/// Alertmanager webhook payload, serialized as a bare array of alerts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertmanagerPayload {
    pub alerts: Vec<AlertmanagerAlert>,
}

/// Where the alert comes from
#[derive(Debug, Clone)]
pub struct AlertContext {
    /// Watcher instance name
    pub instance: String,
    /// Watched location as `lat,lon`
    pub location: String,
    pub generator_url: Option<String>,
}

/// Key for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    alert_type: AlertType,
    location: String,
}

/// Alert emitter with deduplication
pub struct Alerter {
    dedup_window: Duration,
    /// Recent alerts for deduplication (key -> last emission time)
    recent_alerts: RwLock<HashMap<DedupKey, Instant>>,
}

impl Alerter {
    /// Create a new alerter with default 15-minute deduplication window
    pub fn new() -> Self {
        Self {
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            recent_alerts: RwLock::new(HashMap::new()),
        }
    }

    /// Set custom deduplication window
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    fn key(alert_type: AlertType, ctx: &AlertContext) -> DedupKey {
        DedupKey {
            alert_type,
            location: ctx.location.clone(),
        }
    }

    /// Check if an alert should be suppressed due to deduplication
    pub fn should_suppress(&self, alert_type: AlertType, ctx: &AlertContext) -> bool {
        let key = Self::key(alert_type, ctx);
        let alerts = match self.recent_alerts.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        alerts
            .get(&key)
            .map(|last| last.elapsed() < self.dedup_window)
            .unwrap_or(false)
    }

    /// Record that an alert was emitted
    pub fn record_alert(&self, alert_type: AlertType, ctx: &AlertContext) {
        let mut alerts = match self.recent_alerts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        alerts.insert(Self::key(alert_type, ctx), Instant::now());
        alerts.retain(|_, time| time.elapsed() < self.dedup_window);
    }

    /// Create an Alertmanager alert for an anomalous detection
    ///
    /// Returns `None` for non-anomalous detections and for duplicates
    /// within the dedup window.
    pub fn create_alert(
        &self,
        detection: &Detection,
        observation: &Observation,
        ctx: &AlertContext,
        timestamp: &str,
    ) -> Option<AlertmanagerAlert> {
        if !detection.anomalous {
            return None;
        }

        let alert_type = AlertType::for_detection(detection);
        if self.should_suppress(alert_type, ctx) {
            debug!(alert_type = %alert_type, "Suppressing duplicate alert");
            return None;
        }

        let severity = AlertSeverity::from(detection.severity());

        let mut labels = HashMap::new();
        labels.insert("alertname".to_string(), alert_type.to_string());
        labels.insert("severity".to_string(), severity.to_string());
        labels.insert("instance".to_string(), ctx.instance.clone());
        labels.insert("location".to_string(), ctx.location.clone());

        let mut annotations = HashMap::new();
        annotations.insert("summary".to_string(), alert_message(detection, observation));
        annotations.insert(
            "description".to_string(),
            format!(
                "Visits per pizzeria at {} was {:.2} (expected {:.2}, {:+.0}%). \
                 {} places, {} visits, score {:.2} over {} samples.",
                ctx.location,
                observation.ratio,
                detection.expected,
                detection.percentage_above_expected(),
                observation.places,
                observation.visits,
                detection.score,
                detection.samples,
            ),
        );
        annotations.insert("score".to_string(), format!("{:.2}", detection.score));
        annotations.insert("ratio".to_string(), format!("{:.2}", observation.ratio));

        self.record_alert(alert_type, ctx);

        Some(AlertmanagerAlert {
            status: "firing".to_string(),
            labels,
            annotations,
            starts_at: timestamp.to_string(),
            ends_at: None,
            generator_url: ctx.generator_url.clone(),
        })
    }
}

impl Default for Alerter {
    fn default() -> Self {
        Self::new()
    }
}

/// One-line alert text for logs and alert summaries
pub fn alert_message(detection: &Detection, observation: &Observation) -> String {
    format!(
        "*** ALERT: Pizza activity anomaly detected! Score: {:.2}, Ratio: {:.2} ***",
        detection.score, observation.ratio
    )
}

/// Delivers alert payloads to a webhook endpoint
pub struct WebhookNotifier {
    client: Client,
    url: url::Url,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let url = url::Url::parse(url)?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// POST the alerts as an Alertmanager payload
    pub async fn send(&self, alerts: Vec<AlertmanagerAlert>) -> Result<()> {
        let payload = AlertmanagerPayload { alerts };
        let response = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WatchError::Status {
                service: "alert webhook",
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ctx() -> AlertContext {
        AlertContext {
            instance: "watcher-1".to_string(),
            location: "38.8719,-77.0563".to_string(),
            generator_url: None,
        }
    }

    fn observation() -> Observation {
        let ts = NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(23, 0, 0)
            .unwrap();
        Observation::new(ts, 10, 190)
    }

    fn detection(score: f64, residual: f64) -> Detection {
        Detection {
            value: 19.0,
            expected: 9.0,
            residual,
            residual_std: 2.0,
            score,
            threshold: 3.0,
            anomalous: score > 3.0,
            samples: 72,
        }
    }

    #[test]
    fn test_no_alert_for_normal_detection() {
        let alerter = Alerter::new();
        let alert = alerter.create_alert(&detection(1.2, 2.4), &observation(), &ctx(), "now");
        assert!(alert.is_none());
    }

    #[test]
    fn test_spike_alert_labels() {
        let alerter = Alerter::new();
        let alert = alerter
            .create_alert(&detection(5.1, 10.0), &observation(), &ctx(), "2025-06-01T23:00:00Z")
            .unwrap();

        assert_eq!(alert.status, "firing");
        assert_eq!(alert.labels["alertname"], "PizzaRatioSpike");
        assert_eq!(alert.labels["severity"], "critical");
        assert_eq!(alert.annotations["score"], "5.10");
        assert_eq!(alert.annotations["ratio"], "19.00");
        assert!(alert.annotations["summary"].contains("ALERT"));
    }

    #[test]
    fn test_drop_alert_type() {
        let alerter = Alerter::new();
        let alert = alerter
            .create_alert(&detection(3.5, -7.0), &observation(), &ctx(), "now")
            .unwrap();
        assert_eq!(alert.labels["alertname"], "PizzaRatioDrop");
        assert_eq!(alert.labels["severity"], "warning");
    }

    #[test]
    fn test_deduplication() {
        let alerter = Alerter::new();
        let first = alerter.create_alert(&detection(4.0, 8.0), &observation(), &ctx(), "now");
        let second = alerter.create_alert(&detection(4.0, 8.0), &observation(), &ctx(), "now");

        assert!(first.is_some());
        assert!(second.is_none());

        // A drop is a different alert
        let drop = alerter.create_alert(&detection(4.0, -8.0), &observation(), &ctx(), "now");
        assert!(drop.is_some());
    }

    #[test]
    fn test_zero_dedup_window_never_suppresses() {
        let alerter = Alerter::new().with_dedup_window(Duration::ZERO);
        assert!(alerter
            .create_alert(&detection(4.0, 8.0), &observation(), &ctx(), "now")
            .is_some());
        assert!(alerter
            .create_alert(&detection(4.0, 8.0), &observation(), &ctx(), "now")
            .is_some());
    }

    #[test]
    fn test_alertmanager_serialization() {
        let alerter = Alerter::new();
        let alert = alerter
            .create_alert(&detection(4.0, 8.0), &observation(), &ctx(), "2025-06-01T23:00:00Z")
            .unwrap();
        let json = serde_json::to_value(&alert).unwrap();

        assert_eq!(json["startsAt"], "2025-06-01T23:00:00Z");
        assert!(json.get("endsAt").is_none());
    }

    #[tokio::test]
    async fn test_webhook_posts_alerts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/alerts")
            .match_header("content-type", "application/json")
            .with_status(200)
            .create_async()
            .await;

        let notifier =
            WebhookNotifier::new(&format!("{}/hooks/alerts", server.url()), Duration::from_secs(5))
                .unwrap();
        let alert = Alerter::new()
            .create_alert(&detection(4.0, 8.0), &observation(), &ctx(), "now")
            .unwrap();

        notifier.send(vec![alert]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hooks/alerts")
            .with_status(503)
            .create_async()
            .await;

        let notifier =
            WebhookNotifier::new(&format!("{}/hooks/alerts", server.url()), Duration::from_secs(5))
                .unwrap();

        let err = notifier.send(vec![]).await.unwrap_err();
        assert!(matches!(err, WatchError::Status { status: 503, .. }));
    }
}
