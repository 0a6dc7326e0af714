//! Presence worker - processes match events off the capture task
//!
//! The capture loop enqueues match events via an mpsc channel; this worker
//! runs the actual transition through the engine. Keeping the transition
//! off the capture task bounds capture-loop latency and gives an
//! interactive deployment a place to gate the call behind a confirmation
//! prompt.

use crate::domain::types::MemberId;
use crate::services::engine::AttendanceEngine;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A verified match waiting to be turned into a transition
#[derive(Debug)]
pub struct MatchEvent {
    pub member_id: MemberId,
    /// When the capture loop enqueued the event (for queue delay measurement)
    pub matched_at: Instant,
}

/// Worker that drives the engine from match events
pub struct PresenceWorker {
    engine: Arc<AttendanceEngine>,
    event_rx: mpsc::Receiver<MatchEvent>,
}

impl PresenceWorker {
    pub fn new(engine: Arc<AttendanceEngine>, event_rx: mpsc::Receiver<MatchEvent>) -> Self {
        Self { engine, event_rx }
    }

    /// Run the worker, processing events until the channel closes
    pub async fn run(mut self) {
        info!("presence_worker_started");

        while let Some(event) = self.event_rx.recv().await {
            let queue_delay_us = event.matched_at.elapsed().as_micros() as u64;

            match self.engine.record_presence(&event.member_id).await {
                Ok(outcome) => {
                    info!(
                        member_id = %event.member_id,
                        outcome = %outcome.as_str(),
                        queue_delay_us = %queue_delay_us,
                        "presence_processed"
                    );
                }
                Err(e) => {
                    error!(
                        member_id = %event.member_id,
                        error = %e,
                        "presence_processing_failed"
                    );
                }
            }

            // Warn if queue delay exceeds 100ms - indicates backlog
            if queue_delay_us > 100_000 {
                warn!(
                    member_id = %event.member_id,
                    queue_delay_us = %queue_delay_us,
                    "presence_queue_delay_high"
                );
            }
        }

        info!("presence_worker_stopped");
    }
}

/// Create a match event channel and worker
///
/// Returns the sender (for the capture loop) and the worker (to be spawned)
pub fn create_presence_worker(
    engine: Arc<AttendanceEngine>,
    buffer_size: usize,
) -> (mpsc::Sender<MatchEvent>, PresenceWorker) {
    let (event_tx, event_rx) = mpsc::channel(buffer_size);
    let worker = PresenceWorker::new(engine, event_rx);
    (event_tx, worker)
}
