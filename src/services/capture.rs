//! Continuous capture loop and its lifecycle
//!
//! One background worker repeatedly acquires a sample, classifies it
//! against the full candidate set, and enqueues a match event for the
//! presence worker. Lifecycle is Stopped -> Running -> Stopped:
//!
//! - `start()` is a no-op while running and spawns exactly one worker
//! - `stop()` is cooperative: the worker observes the shutdown flag at its
//!   checkpoints (before acquisition, during the idle wait) and exits;
//!   calling it while stopped is a safe no-op
//! - the service is restartable after a stop (fresh worker, fresh
//!   shutdown channel)
//!
//! Every per-iteration failure is logged and the loop continues; nothing
//! here terminates the host process.

use crate::domain::types::Sample;
use crate::infra::metrics::Metrics;
use crate::io::directory::MemberDirectory;
use crate::io::sensor::SampleSource;
use crate::services::matcher::{classify_sample, MatchOutcome, Matcher};
use crate::services::presence_worker::MatchEvent;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Running capture state: shutdown signal plus the worker handle
struct CaptureSession {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the capture worker lifecycle
pub struct CaptureService {
    sensor: Arc<dyn SampleSource>,
    directory: Arc<dyn MemberDirectory>,
    matcher: Arc<dyn Matcher>,
    event_tx: mpsc::Sender<MatchEvent>,
    metrics: Arc<Metrics>,
    idle_interval: Duration,
    session: parking_lot::Mutex<Option<CaptureSession>>,
}

impl CaptureService {
    pub fn new(
        sensor: Arc<dyn SampleSource>,
        directory: Arc<dyn MemberDirectory>,
        matcher: Arc<dyn Matcher>,
        event_tx: mpsc::Sender<MatchEvent>,
        metrics: Arc<Metrics>,
        idle_interval: Duration,
    ) -> Self {
        Self {
            sensor,
            directory,
            matcher,
            event_tx,
            metrics,
            idle_interval,
            session: parking_lot::Mutex::new(None),
        }
    }

    /// Spawn the capture worker; no-op if already running
    pub fn start(&self) {
        let mut session = self.session.lock();
        if session.is_some() {
            info!("capture_already_running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = CaptureWorker {
            sensor: self.sensor.clone(),
            directory: self.directory.clone(),
            matcher: self.matcher.clone(),
            event_tx: self.event_tx.clone(),
            metrics: self.metrics.clone(),
            idle_interval: self.idle_interval,
        };
        let handle = tokio::spawn(worker.run(shutdown_rx));

        *session = Some(CaptureSession { shutdown_tx, handle });
        info!("capture_started");
    }

    /// Signal the worker to stop and wait for it to exit; no-op if stopped
    pub async fn stop(&self) {
        let session = self.session.lock().take();
        let Some(session) = session else {
            info!("capture_not_running");
            return;
        };

        let _ = session.shutdown_tx.send(true);
        if let Err(e) = session.handle.await {
            warn!(error = %e, "capture_worker_join_failed");
        }
        info!("capture_stopped");
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }
}

/// The background worker: one per running session
struct CaptureWorker {
    sensor: Arc<dyn SampleSource>,
    directory: Arc<dyn MemberDirectory>,
    matcher: Arc<dyn Matcher>,
    event_tx: mpsc::Sender<MatchEvent>,
    metrics: Arc<Metrics>,
    idle_interval: Duration,
}

impl CaptureWorker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("capture_worker_started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                result = self.sensor.acquire_sample() => {
                    match result {
                        Ok(sample) => {
                            self.metrics.record_sample();
                            self.process_sample(sample).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "sample_acquisition_failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            // Idle wait between iterations, interruptible by stop()
            tokio::select! {
                _ = tokio::time::sleep(self.idle_interval) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("capture_worker_stopped");
    }

    async fn process_sample(&self, sample: Sample) {
        let candidates = match self.directory.list_candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "candidate_fetch_failed");
                return;
            }
        };

        let scan_start = Instant::now();
        let outcome = classify_sample(self.matcher.as_ref(), &sample, &candidates);
        self.metrics.record_scan_latency(scan_start.elapsed().as_micros() as u64);

        match outcome {
            MatchOutcome::Matched(member) => {
                self.metrics.record_match();
                info!(member_id = %member.id, "sample_matched");

                let event = MatchEvent { member_id: member.id, matched_at: Instant::now() };
                // Never block the capture loop on a slow presence worker
                match self.event_tx.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.metrics.record_match_event_dropped();
                        warn!("match_event_dropped: channel full");
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!("match_event_channel_closed");
                    }
                }
            }
            MatchOutcome::NoMatch => {
                self.metrics.record_no_match();
                debug!("sample_no_match");
            }
            MatchOutcome::QualityError => {
                // Skipped silently: no transition, nothing surfaced
                self.metrics.record_quality_failure();
                debug!("sample_quality_rejected");
            }
        }
    }
}
