//! Occupancy snapshot cache
//!
//! TTL-bounded read cache over the repository aggregates the dashboard
//! polls: members inside/outside, most recent entry and exit. Refresh is
//! lazy (on read, when stale) and forced by `invalidate()` after any
//! write.
//!
//! Key behaviors:
//! - Recomputation issues the four sub-queries without holding the lock;
//!   a transient inconsistency between them is tolerated for a few seconds
//! - Two callers recomputing concurrently is last-writer-wins; both
//!   computed the same query set so the race is benign

use crate::domain::record::AttendanceRecord;
use crate::infra::metrics::Metrics;
use crate::io::directory::MemberDirectory;
use crate::io::repository::AttendanceRepository;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Derived occupancy aggregates with the instant they were computed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancySnapshot {
    /// Members with an open record
    pub inside: u64,
    /// Registered members without an open record
    pub outside: u64,
    pub total_members: u64,
    /// Open record with the latest entry timestamp
    pub last_entry: Option<AttendanceRecord>,
    /// Closed record with the latest exit timestamp
    pub last_exit: Option<AttendanceRecord>,
    #[serde(skip_serializing)]
    pub computed_at: Instant,
}

/// Lazily refreshed occupancy cache
pub struct OccupancyCache {
    repo: Arc<dyn AttendanceRepository>,
    directory: Arc<dyn MemberDirectory>,
    metrics: Arc<Metrics>,
    /// Maximum snapshot age before recompute
    freshness: Duration,
    cached: RwLock<Option<OccupancySnapshot>>,
}

impl OccupancyCache {
    pub fn new(
        repo: Arc<dyn AttendanceRepository>,
        directory: Arc<dyn MemberDirectory>,
        metrics: Arc<Metrics>,
        freshness: Duration,
    ) -> Self {
        Self { repo, directory, metrics, freshness, cached: RwLock::new(None) }
    }

    /// Current snapshot, recomputed if the cached one is stale or absent
    pub async fn snapshot(&self) -> anyhow::Result<OccupancySnapshot> {
        if let Some(snapshot) = self.fresh_cached() {
            self.metrics.record_cache_hit();
            return Ok(snapshot);
        }
        self.recompute().await
    }

    /// Drop the cached snapshot so the next read recomputes
    ///
    /// Called after every engine or auto-checkout write.
    pub fn invalidate(&self) {
        *self.cached.write() = None;
        debug!("occupancy_cache_invalidated");
    }

    fn fresh_cached(&self) -> Option<OccupancySnapshot> {
        let cached = self.cached.read();
        cached
            .as_ref()
            .filter(|s| s.computed_at.elapsed() <= self.freshness)
            .cloned()
    }

    async fn recompute(&self) -> anyhow::Result<OccupancySnapshot> {
        // Sub-queries run unlocked; last writer wins below
        let inside = self.repo.count_open().await?;
        let total_members = self.directory.member_count().await?;
        let last_entry = self.repo.most_recent_open().await?;
        let last_exit = self.repo.most_recent_closed().await?;

        let snapshot = OccupancySnapshot {
            inside,
            outside: total_members.saturating_sub(inside),
            total_members,
            last_entry,
            last_exit,
            computed_at: Instant::now(),
        };

        self.metrics.record_cache_refresh();
        self.metrics.set_members_inside(inside);
        *self.cached.write() = Some(snapshot.clone());

        debug!(inside = %snapshot.inside, outside = %snapshot.outside, "occupancy_recomputed");
        Ok(snapshot)
    }
}
