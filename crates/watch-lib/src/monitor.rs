//! Polling loop
//!
//! Each cycle fetches the current places, turns them into a visits-per-place
//! observation, scores it against the ratio history and appends the result
//! to the stats log. Cycles repeat at a fixed interval until shutdown.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::anomaly::{
    AlertContext, Alerter, AnomalyDetector, Detection, DetectorConfig, RatioHistory,
    WebhookNotifier, DEFAULT_HISTORY_CAPACITY,
};
use crate::error::{Result, WatchError};
use crate::health::{components, HealthRegistry};
use crate::models::{Observation, Place, PlaceId};
use crate::observability::{StructuredLogger, WatchMetrics};
use crate::overpass::PlaceSource;
use crate::store::{PlaceCatalog, PlaceDiff, PlaceLedger, StatsStore};
use crate::visits::{SimulatedVisits, VisitEstimator};

/// Default stats log path
pub const DEFAULT_STATS_FILE: &str = "pizza_stats.csv";

/// Default known-places ledger path
pub const DEFAULT_LEDGER_FILE: &str = "pizzerias_seen.txt";

/// Configuration for the polling loop
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between polls (default: 1 hour)
    pub interval: Duration,
    /// Maximum random delay added to each interval
    pub jitter: Duration,
    /// Ratios kept for detection
    pub history_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            jitter: Duration::ZERO,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Outcome of one poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub observation: Observation,
    pub detection: Option<Detection>,
    pub new_places: Vec<Place>,
    pub removed_places: Vec<PlaceId>,
    /// An alert was raised (not suppressed as a duplicate)
    pub alerted: bool,
    pub history_samples: usize,
}

impl CycleReport {
    pub fn is_anomalous(&self) -> bool {
        self.detection.as_ref().map(|d| d.anomalous).unwrap_or(false)
    }
}

/// Periodic poll-detect-record loop
pub struct MonitorLoop {
    source: Arc<dyn PlaceSource>,
    visits: Arc<dyn VisitEstimator>,
    detector: AnomalyDetector,
    history: RatioHistory,
    stats: StatsStore,
    ledger: PlaceLedger,
    catalog: Arc<PlaceCatalog>,
    alerter: Alerter,
    notifier: Option<WebhookNotifier>,
    alert_context: AlertContext,
    health: HealthRegistry,
    metrics: WatchMetrics,
    logger: StructuredLogger,
    reports: watch::Sender<Option<CycleReport>>,
    config: MonitorConfig,
}

impl MonitorLoop {
    pub fn history(&self) -> &RatioHistory {
        &self.history
    }

    /// Run until the shutdown channel fires
    ///
    /// The first poll happens immediately. A poll in flight is finished
    /// before shutdown is honoured; the wait between polls is not.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            history_samples = self.history.len(),
            "Starting monitor loop"
        );

        let mut cycles = 0u64;
        loop {
            let started = Instant::now();
            match self.poll_once().await {
                Ok(report) => {
                    cycles += 1;
                    debug!(
                        cycle = cycles,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        anomalous = report.is_anomalous(),
                        "Poll cycle complete"
                    );
                }
                Err(e) => debug!(error = %e, "Poll cycle skipped"),
            }

            let delay = self.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down monitor loop");
                    break;
                }
            }
        }
    }

    /// Interval plus random jitter
    fn next_delay(&self) -> Duration {
        let max_ms = self.config.jitter.as_millis() as u64;
        if max_ms == 0 {
            return self.config.interval;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=max_ms);
        self.config.interval + Duration::from_millis(jitter_ms)
    }

    /// Run a single poll cycle
    ///
    /// A failed fetch skips the cycle without touching the ledger or the
    /// stats log. Storage failures are logged and reported through health
    /// but do not fail the cycle.
    pub async fn poll_once(&mut self) -> Result<CycleReport> {
        let mut store_ok = true;
        let known = match self.ledger.load() {
            Ok(known) => known,
            Err(e) => {
                store_ok = false;
                self.logger.log_poll_failed("ledger load", &e);
                self.health
                    .set_degraded(components::STORE, e.to_string())
                    .await;
                Default::default()
            }
        };

        let fetch_started = Instant::now();
        let places = match self.source.fetch_places().await {
            Ok(places) => {
                self.health.set_healthy(components::OVERPASS).await;
                places
            }
            Err(e) => {
                self.metrics.inc_poll_errors();
                self.logger.log_poll_failed("fetch", &e);
                self.health
                    .set_degraded(components::OVERPASS, e.to_string())
                    .await;
                return Err(e);
            }
        };
        self.metrics
            .observe_poll_latency(fetch_started.elapsed().as_secs_f64());

        let diff = PlaceDiff::between(&known, &places);
        self.logger.log_places_changed(&diff);
        self.metrics.add_new_places(diff.added.len());

        if let Err(e) = self.ledger.save(places.iter().map(|p| &p.id)) {
            store_ok = false;
            self.logger.log_poll_failed("ledger save", &e);
            self.health
                .set_unhealthy(components::STORE, e.to_string())
                .await;
        }
        self.catalog.replace(&places);

        let visits = self.visits.estimate(places.len());
        let observation = Observation::now(places.len(), visits);

        self.history.push(observation.ratio);
        let detection = self.detector.detect(&self.history.to_vec());
        self.health.set_healthy(components::DETECTOR).await;

        self.metrics.record_observation(&observation);
        self.metrics
            .record_detection(detection.as_ref(), self.history.len());
        self.logger.log_observation(&observation);
        self.logger.log_score(detection.as_ref(), self.history.len());

        let mut alerted = false;
        if let Some(d) = detection.as_ref().filter(|d| d.anomalous) {
            self.logger.log_anomaly(d, &observation);
            alerted = self.dispatch_alert(d, &observation).await;
        }

        if let Err(e) = self.stats.append(&observation, detection.as_ref()) {
            store_ok = false;
            self.logger.log_poll_failed("stats append", &e);
            self.health
                .set_unhealthy(components::STORE, e.to_string())
                .await;
        }
        if store_ok {
            self.health.set_healthy(components::STORE).await;
        }

        self.health
            .record_poll(chrono::Utc::now().timestamp())
            .await;

        let report = CycleReport {
            observation,
            detection,
            new_places: diff.added,
            removed_places: diff.removed,
            alerted,
            history_samples: self.history.len(),
        };
        self.reports.send_replace(Some(report.clone()));

        Ok(report)
    }

    /// Build and deliver an alert; returns whether one was raised
    async fn dispatch_alert(&self, detection: &Detection, observation: &Observation) -> bool {
        let starts_at = chrono::Utc::now().to_rfc3339();
        let Some(alert) =
            self.alerter
                .create_alert(detection, observation, &self.alert_context, &starts_at)
        else {
            return false;
        };

        if let Some(notifier) = &self.notifier {
            let target = notifier.url().to_string();
            match notifier.send(vec![alert]).await {
                Ok(()) => {
                    self.metrics.inc_alerts_sent();
                    self.logger.log_alert_delivery(&target, Ok(()));
                    self.health.set_healthy(components::NOTIFIER).await;
                }
                Err(e) => {
                    self.metrics.inc_alert_errors();
                    self.logger.log_alert_delivery(&target, Err(&e as &dyn std::error::Error));
                    self.health
                        .set_degraded(components::NOTIFIER, e.to_string())
                        .await;
                }
            }
        }

        true
    }
}

/// Builder for creating the monitor loop
pub struct MonitorLoopBuilder {
    source: Option<Arc<dyn PlaceSource>>,
    visits: Option<Arc<dyn VisitEstimator>>,
    detector: DetectorConfig,
    stats: StatsStore,
    ledger: PlaceLedger,
    catalog: Option<Arc<PlaceCatalog>>,
    alerter: Alerter,
    notifier: Option<WebhookNotifier>,
    alert_context: Option<AlertContext>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
    config: MonitorConfig,
}

impl MonitorLoopBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            visits: None,
            detector: DetectorConfig::default(),
            stats: StatsStore::new(DEFAULT_STATS_FILE),
            ledger: PlaceLedger::new(DEFAULT_LEDGER_FILE),
            catalog: None,
            alerter: Alerter::new(),
            notifier: None,
            alert_context: None,
            health: None,
            logger: None,
            config: MonitorConfig::default(),
        }
    }

    /// Set the place source (required)
    pub fn source(mut self, source: Arc<dyn PlaceSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn visits(mut self, visits: Arc<dyn VisitEstimator>) -> Self {
        self.visits = Some(visits);
        self
    }

    pub fn detector(mut self, config: DetectorConfig) -> Self {
        self.detector = config;
        self
    }

    pub fn stats_store(mut self, stats: StatsStore) -> Self {
        self.stats = stats;
        self
    }

    pub fn ledger(mut self, ledger: PlaceLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn catalog(mut self, catalog: Arc<PlaceCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn alerter(mut self, alerter: Alerter) -> Self {
        self.alerter = alerter;
        self
    }

    pub fn notifier(mut self, notifier: WebhookNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn alert_context(mut self, ctx: AlertContext) -> Self {
        self.alert_context = Some(ctx);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    /// Build the loop, seeding the history from the stats log
    pub fn build(self) -> Result<(MonitorLoop, watch::Receiver<Option<CycleReport>>)> {
        let source = self
            .source
            .ok_or(WatchError::MissingComponent("Place source"))?;

        let seeded = match self.stats.load_ratios(self.config.history_capacity) {
            Ok(ratios) => ratios,
            Err(e) => {
                warn!(error = %e, path = %self.stats.path().display(), "Failed to load ratio history, starting empty");
                Vec::new()
            }
        };
        let history = RatioHistory::from_values(seeded, self.config.history_capacity);

        let (reports, reports_rx) = watch::channel(None);
        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("pizza-watcher"));
        let alert_context = self.alert_context.unwrap_or_else(|| AlertContext {
            instance: logger.instance().to_string(),
            location: String::new(),
            generator_url: None,
        });

        let monitor = MonitorLoop {
            source,
            visits: self
                .visits
                .unwrap_or_else(|| Arc::new(SimulatedVisits::default())),
            detector: AnomalyDetector::new(self.detector),
            history,
            stats: self.stats,
            ledger: self.ledger,
            catalog: self.catalog.unwrap_or_default(),
            alerter: self.alerter,
            notifier: self.notifier,
            alert_context,
            health: self.health.unwrap_or_default(),
            metrics: WatchMetrics::new(),
            logger,
            reports,
            config: self.config,
        };

        Ok((monitor, reports_rx))
    }
}

impl Default for MonitorLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ElementKind;
    use crate::overpass::async_trait;
    use std::f64::consts::PI;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Place source returning a configurable list
    struct MockSource {
        places: Mutex<Vec<Place>>,
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    impl MockSource {
        fn new(ids: &[i64]) -> Self {
            Self {
                places: Mutex::new(ids.iter().map(|&i| place(i)).collect()),
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        fn set(&self, ids: &[i64]) {
            *self.places.lock().unwrap() = ids.iter().map(|&i| place(i)).collect();
        }
    }

    #[async_trait]
    impl PlaceSource for MockSource {
        async fn fetch_places(&self) -> Result<Vec<Place>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(WatchError::Status {
                    service: "Overpass API",
                    status: 504,
                    body: "gateway timeout".to_string(),
                });
            }
            Ok(self.places.lock().unwrap().clone())
        }
    }

    /// Fixed visits per place
    struct FixedVisits(u64);

    impl VisitEstimator for FixedVisits {
        fn estimate(&self, places: usize) -> u64 {
            self.0 * places as u64
        }
    }

    fn place(id: i64) -> Place {
        Place {
            id: PlaceId::new(ElementKind::Node, id),
            latitude: Some(38.87),
            longitude: Some(-77.05),
            name: format!("Pizza {}", id),
        }
    }

    fn build(
        dir: &TempDir,
        source: Arc<MockSource>,
        visits_per_place: u64,
    ) -> (MonitorLoop, watch::Receiver<Option<CycleReport>>, HealthRegistry) {
        let health = HealthRegistry::new();
        let (monitor, rx) = MonitorLoopBuilder::new()
            .source(source)
            .visits(Arc::new(FixedVisits(visits_per_place)))
            .stats_store(StatsStore::new(dir.path().join("stats.csv")))
            .ledger(PlaceLedger::new(dir.path().join("seen.txt")))
            .health(health.clone())
            .build()
            .unwrap();
        (monitor, rx, health)
    }

    #[test]
    fn test_monitor_config_default() {
        let config = MonitorConfig::default();
        assert_eq!(config.interval, Duration::from_secs(3600));
        assert_eq!(config.jitter, Duration::ZERO);
        assert_eq!(config.history_capacity, 72);
    }

    #[test]
    fn test_builder_requires_source() {
        let result = MonitorLoopBuilder::new().build();
        assert!(matches!(result, Err(WatchError::MissingComponent(_))));
    }

    #[tokio::test]
    async fn test_poll_records_observation() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new(&[1, 2, 3]));
        let (mut monitor, rx, health) = build(&dir, source, 6);

        let report = monitor.poll_once().await.unwrap();

        assert_eq!(report.observation.places, 3);
        assert_eq!(report.observation.visits, 18);
        assert_eq!(report.observation.ratio, 6.0);
        assert_eq!(report.new_places.len(), 3);
        assert!(report.detection.is_none());
        assert!(!report.alerted);

        let stats = StatsStore::new(dir.path().join("stats.csv"));
        assert_eq!(stats.load_ratios(72).unwrap(), vec![6.0]);
        let ledger = PlaceLedger::new(dir.path().join("seen.txt"));
        assert_eq!(ledger.load().unwrap().len(), 3);

        assert!(rx.borrow().is_some());
        assert_eq!(health.health().await.polls_completed, 1);
    }

    #[tokio::test]
    async fn test_second_poll_reports_changes() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new(&[1, 2]));
        let (mut monitor, _rx, _health) = build(&dir, source.clone(), 5);

        monitor.poll_once().await.unwrap();
        source.set(&[2, 3]);
        let report = monitor.poll_once().await.unwrap();

        assert_eq!(report.new_places, vec![place(3)]);
        assert_eq!(report.removed_places, vec![PlaceId::new(ElementKind::Node, 1)]);
        assert_eq!(monitor.history().len(), 2);
    }

    #[tokio::test]
    async fn test_no_places_gives_zero_ratio() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new(&[]));
        let (mut monitor, _rx, _health) = build(&dir, source, 5);

        let report = monitor.poll_once().await.unwrap();
        assert_eq!(report.observation.places, 0);
        assert_eq!(report.observation.ratio, 0.0);
    }

    #[tokio::test]
    async fn test_failed_fetch_skips_cycle() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new(&[1]));
        let (mut monitor, _rx, health) = build(&dir, source.clone(), 5);

        monitor.poll_once().await.unwrap();
        source.fail.store(true, Ordering::SeqCst);

        let result = monitor.poll_once().await;
        assert!(result.is_err());

        let stats = StatsStore::new(dir.path().join("stats.csv"));
        assert_eq!(stats.load_ratios(72).unwrap().len(), 1);
        let ledger = PlaceLedger::new(dir.path().join("seen.txt"));
        assert_eq!(ledger.load().unwrap().len(), 1);
        assert_eq!(monitor.history().len(), 1);

        let status = health.health().await;
        assert_eq!(
            status.components[components::OVERPASS].status,
            crate::health::ComponentStatus::Degraded
        );
        assert_eq!(status.polls_completed, 1);
    }

    #[tokio::test]
    async fn test_unreadable_ledger_keeps_store_degraded() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("seen.txt"), [0xff, 0xfe, 0x00, 0x80]).unwrap();
        let source = Arc::new(MockSource::new(&[1, 2]));
        let (mut monitor, _rx, health) = build(&dir, source, 5);

        let report = monitor.poll_once().await.unwrap();

        // Every place looks new and the ledger is rewritten
        assert_eq!(report.new_places.len(), 2);
        let ledger = PlaceLedger::new(dir.path().join("seen.txt"));
        assert_eq!(ledger.load().unwrap().len(), 2);

        let status = health.health().await;
        let store = &status.components[components::STORE];
        assert_eq!(store.status, crate::health::ComponentStatus::Degraded);
        assert!(store.message.is_some());

        // The next clean cycle recovers
        monitor.poll_once().await.unwrap();
        let status = health.health().await;
        assert_eq!(
            status.components[components::STORE].status,
            crate::health::ComponentStatus::Healthy
        );
    }

    #[test]
    fn test_next_delay_stays_within_jitter() {
        let dir = TempDir::new().unwrap();
        let (monitor, _rx) = MonitorLoopBuilder::new()
            .source(Arc::new(MockSource::new(&[1])))
            .stats_store(StatsStore::new(dir.path().join("stats.csv")))
            .ledger(PlaceLedger::new(dir.path().join("seen.txt")))
            .interval(Duration::from_secs(60))
            .jitter(Duration::from_millis(500))
            .build()
            .unwrap();

        let lower = Duration::from_secs(60);
        let upper = lower + Duration::from_millis(500);
        let delays: Vec<Duration> = (0..200).map(|_| monitor.next_delay()).collect();
        assert!(delays.iter().all(|d| *d >= lower && *d <= upper));
        // 200 draws from 501 values are not all equal
        assert!(delays.iter().any(|d| *d != delays[0]));
    }

    #[tokio::test]
    async fn test_seeded_history_flags_spike() {
        let dir = TempDir::new().unwrap();
        let stats = StatsStore::new(dir.path().join("stats.csv"));
        let start = chrono::NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        for t in 0..71u32 {
            // Ratios between ~7 and ~11 following a daily cycle
            let ratio = 9.0 + 2.0 * (2.0 * PI * t as f64 / 24.0).sin() + 0.1 * ((t * 7 % 5) as f64);
            let visits = (ratio * 100.0).round() as u64;
            let obs = Observation::new(start + chrono::Duration::hours(t as i64), 100, visits);
            stats.append(&obs, None).unwrap();
        }

        let source = Arc::new(MockSource::new(&[1, 2]));
        let (mut monitor, _rx, _health) = build(&dir, source, 30);
        assert_eq!(monitor.history().len(), 71);

        let report = monitor.poll_once().await.unwrap();
        assert_eq!(report.observation.ratio, 30.0);
        assert!(report.is_anomalous());
        assert!(report.alerted);
        assert_eq!(report.history_samples, 72);

        let records = stats.load_records(1).unwrap();
        assert_eq!(records[0].anomaly, Some(true));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MockSource::new(&[1]));
        let (monitor, mut rx, _health) = build(&dir, source.clone(), 5);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(monitor.run(shutdown_rx));

        rx.changed().await.unwrap();
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor loop did not stop")
            .unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
