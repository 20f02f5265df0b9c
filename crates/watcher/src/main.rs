//! Pizza watcher - pizza place activity monitor
//!
//! Runs as a long-lived service under a supervisor, polling the Overpass API
//! once per interval and flagging unusual visits-per-place ratios.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pizza_watcher::{api, config::WatcherConfig, logging};
use tokio::sync::broadcast;
use tracing::{error, info};
use watch_lib::{
    anomaly::{AlertContext, Alerter, WebhookNotifier},
    health::{components, HealthRegistry},
    monitor::MonitorLoopBuilder,
    observability::{StructuredLogger, WatchMetrics},
    overpass::OverpassClient,
    store::{PlaceCatalog, PlaceLedger, StatsStore},
    visits::SimulatedVisits,
};

const WATCHER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration first: the log file location comes from it
    let config = WatcherConfig::load()?;
    logging::init(&config.log_file)?;

    info!("Starting pizza-watcher");
    info!(
        instance = %config.instance,
        location = %config.location(),
        radius_m = config.radius_m,
        "Watcher configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::OVERPASS).await;
    health_registry.register(components::STORE).await;
    health_registry.register(components::DETECTOR).await;

    let metrics = WatchMetrics::new();
    let logger = StructuredLogger::new(&config.instance);

    let source = OverpassClient::new(
        config.overpass_config(),
        config.search_area(),
        config.place_filter(),
    )
    .context("Failed to create Overpass client")?;

    let alert_context = AlertContext {
        instance: config.instance.clone(),
        location: config.location(),
        generator_url: None,
    };

    let catalog = Arc::new(PlaceCatalog::new());
    let mut builder = MonitorLoopBuilder::new()
        .source(Arc::new(source))
        .visits(Arc::new(SimulatedVisits::new(
            config.min_visits,
            config.max_visits,
        )))
        .detector(config.detector_config())
        .stats_store(StatsStore::new(&config.stats_file))
        .ledger(PlaceLedger::new(&config.known_places_file))
        .catalog(catalog.clone())
        .alerter(Alerter::new().with_dedup_window(Duration::from_secs(config.dedup_window_secs)))
        .alert_context(alert_context)
        .health(health_registry.clone())
        .logger(logger.clone())
        .interval(Duration::from_secs(config.interval_secs))
        .jitter(Duration::from_secs(config.jitter_secs))
        .history_capacity(config.window);

    if let Some(url) = &config.alert_webhook_url {
        let notifier = WebhookNotifier::new(url, Duration::from_secs(config.alert_timeout_secs))
            .context("Invalid alert webhook URL")?;
        health_registry.register(components::NOTIFIER).await;
        builder = builder.notifier(notifier);
    }

    let (monitor, reports) = builder.build().context("Failed to build monitor loop")?;
    logger.log_startup(WATCHER_VERSION, &config.location(), monitor.history().len());

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        catalog,
        reports,
    ));
    let listener = api::bind(config.api_port).await?;
    let mut api_handle = tokio::spawn(api::serve(listener, app_state));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

    // A dead API server takes health checks with it, so stop polling too
    let reason = tokio::select! {
        reason = wait_for_signal() => reason?,
        res = &mut api_handle => {
            match res {
                Ok(Ok(())) => error!("API server exited unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task failed"),
            }
            "API server stopped"
        }
    };
    info!(reason = %reason, "Shutting down");
    let _ = shutdown_tx.send(());

    if let Err(e) = monitor_handle.await {
        error!(error = %e, "Monitor loop task failed");
    }
    api_handle.abort();

    logger.log_shutdown(reason);
    Ok(())
}

/// Wait for SIGINT or SIGTERM, returning which one arrived
#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for SIGINT")?;
            Ok("SIGINT received")
        }
        _ = sigterm.recv() => Ok("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    Ok("Ctrl-C received")
}
