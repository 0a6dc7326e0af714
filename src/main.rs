//! presenced - facility presence tracking daemon
//!
//! Tracks member check-ins/check-outs from a continuous biometric capture
//! loop, serves a cached occupancy view to the dashboard, and force-closes
//! abandoned sessions at midnight.
//!
//! Module structure:
//! - `domain/` - Core business types (Member, AttendanceRecord)
//! - `io/` - External interfaces (Sensor, Repository, Directory, Audit, HTTP)
//! - `services/` - Business logic (Engine, Capture, Matcher, Occupancy)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use presenced::infra::{Config, Metrics};
use presenced::io::http::HttpState;
use presenced::io::{
    start_sensor_listener, AuditLog, ChannelSource, MemoryRepository, RosterDirectory,
    SensorListenerConfig,
};
use presenced::services::{
    create_presence_worker, AttendanceEngine, AutoCheckout, CaptureService, OccupancyCache,
    SimilarityMatcher,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// presenced - facility presence tracking daemon
#[derive(Parser, Debug)]
#[command(name = "presenced", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full capture visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("presenced starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        facility_id = %config.facility_id(),
        capacity = %config.capacity(),
        roster_file = %config.roster_file(),
        idle_interval_ms = %config.idle_interval_ms(),
        freshness_secs = %config.freshness_secs(),
        auto_checkout = %config.auto_checkout_enabled(),
        sensor_port = %config.sensor_listener_port(),
        http_port = %config.http_port(),
        "config_loaded"
    );

    // Member roster (read-only; registration is an external concern)
    let directory = match RosterDirectory::load(config.roster_file()) {
        Ok(directory) => Arc::new(directory),
        Err(e) => {
            warn!(error = %e, "roster_load_failed: starting with empty roster");
            Arc::new(RosterDirectory::from_members(Vec::new()))
        }
    };

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    metrics.set_members_known(directory.len() as u64);

    let repo = Arc::new(MemoryRepository::new());
    let occupancy = Arc::new(OccupancyCache::new(
        repo.clone(),
        directory.clone(),
        metrics.clone(),
        Duration::from_secs(config.freshness_secs()),
    ));
    let audit = Arc::new(AuditLog::new(config.audit_file()));
    let engine = Arc::new(AttendanceEngine::new(
        repo.clone(),
        directory.clone(),
        occupancy.clone(),
        audit.clone(),
        metrics.clone(),
    ));

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Presence worker consumes match events off the capture task
    let (event_tx, presence_worker) = create_presence_worker(engine.clone(), config.event_buffer());
    tokio::spawn(presence_worker.run());

    // Sample feed: TCP sensor bridge -> channel source -> capture loop
    let (sample_feed, sample_source) = ChannelSource::new(config.event_buffer());
    let sensor_config = SensorListenerConfig {
        port: config.sensor_listener_port(),
        enabled: config.sensor_listener_enabled(),
    };
    let sensor_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_sensor_listener(sensor_config, sample_feed, sensor_shutdown).await {
            tracing::error!(error = %e, "sensor listener error");
        }
    });

    // Start the continuous capture loop
    let capture = Arc::new(CaptureService::new(
        Arc::new(sample_source),
        directory.clone(),
        Arc::new(SimilarityMatcher::new(config.match_threshold())),
        event_tx,
        metrics.clone(),
        Duration::from_millis(config.idle_interval_ms()),
    ));
    capture.start();

    // Start the midnight sweep
    let auto_checkout_handle = if config.auto_checkout_enabled() {
        let job = AutoCheckout::new(
            repo.clone(),
            occupancy.clone(),
            audit.clone(),
            metrics.clone(),
            Duration::from_secs(config.shutdown_grace_secs()),
        );
        Some(job.start())
    } else {
        info!("auto_checkout_disabled");
        None
    };

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Start operational HTTP server (if port > 0)
    let http_port = config.http_port();
    if http_port > 0 {
        let state = HttpState {
            metrics: metrics.clone(),
            occupancy: occupancy.clone(),
            engine: engine.clone(),
            facility_id: config.facility_id().to_string(),
            capacity: config.capacity(),
        };
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = presenced::io::http::start_http_server(http_port, state, http_shutdown).await
            {
                tracing::error!(error = %e, "HTTP server error");
            }
        });
    }

    // Wait for Ctrl+C, then shut everything down in order
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");

    let _ = shutdown_tx.send(true);
    capture.stop().await;
    if let Some(handle) = auto_checkout_handle {
        handle.stop().await;
    }

    info!("presenced shutdown complete");
    Ok(())
}
