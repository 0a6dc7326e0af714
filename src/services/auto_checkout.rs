//! Midnight auto-checkout scheduler
//!
//! Members who never check out would otherwise hold an open record
//! forever. A daily sweep at local midnight force-closes every open
//! record with a 00:00 exit sentinel and invalidates the occupancy cache.
//!
//! Key behaviors:
//! - Each record's update is independent: a failure on one record is
//!   logged and the sweep continues with the rest
//! - Shutdown waits a bounded grace period for an in-flight sweep, then
//!   aborts with a warning rather than blocking indefinitely

use crate::domain::record::AttendanceRecord;
use crate::infra::metrics::Metrics;
use crate::io::audit::{AuditLog, AUDIT_AUTO_CHECKOUT};
use crate::io::repository::AttendanceRepository;
use crate::services::occupancy::OccupancyCache;
use chrono::{Local, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Exit sentinel stamped on force-closed records
pub const AUTO_CHECKOUT_TIME: NaiveTime = NaiveTime::MIN;

/// Seconds until the next local midnight
pub fn delay_until_midnight(now: NaiveDateTime) -> Duration {
    let next_midnight = match now.date().succ_opt() {
        Some(tomorrow) => tomorrow.and_time(NaiveTime::MIN),
        // Calendar overflow; push the next fire a day out
        None => return Duration::from_secs(24 * 60 * 60),
    };
    (next_midnight - now).to_std().unwrap_or(Duration::from_secs(24 * 60 * 60))
}

/// Daily force-close job for abandoned sessions
pub struct AutoCheckout {
    repo: Arc<dyn AttendanceRepository>,
    occupancy: Arc<OccupancyCache>,
    audit: Arc<AuditLog>,
    metrics: Arc<Metrics>,
    shutdown_grace: Duration,
}

/// Handle to a started scheduler; `stop()` performs the bounded shutdown
pub struct AutoCheckoutHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    shutdown_grace: Duration,
}

impl AutoCheckout {
    pub fn new(
        repo: Arc<dyn AttendanceRepository>,
        occupancy: Arc<OccupancyCache>,
        audit: Arc<AuditLog>,
        metrics: Arc<Metrics>,
        shutdown_grace: Duration,
    ) -> Self {
        Self { repo, occupancy, audit, metrics, shutdown_grace }
    }

    /// Spawn the scheduler task
    pub fn start(self) -> AutoCheckoutHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_grace = self.shutdown_grace;
        let handle = tokio::spawn(self.run(shutdown_rx));
        AutoCheckoutHandle { shutdown_tx, handle, shutdown_grace }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("auto_checkout_started");

        loop {
            // Recompute each cycle so the fire stays aligned with midnight
            let delay = delay_until_midnight(Local::now().naive_local());
            info!(next_fire_secs = %delay.as_secs(), "auto_checkout_scheduled");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let closed = self.sweep().await;
                    info!(closed = %closed, "auto_checkout_fired");
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("auto_checkout_stopped");
    }

    /// Force-close every open record; returns how many were closed
    pub async fn sweep(&self) -> usize {
        let open = match self.repo.all_open().await {
            Ok(open) => open,
            Err(e) => {
                self.metrics.record_storage_error();
                error!(error = %e, "auto_checkout_query_failed");
                return 0;
            }
        };

        let mut closed = 0;
        for record in open {
            match self.close_record(record).await {
                Ok(()) => closed += 1,
                Err(_) => {
                    // Already logged; keep sweeping the rest
                }
            }
        }

        self.occupancy.invalidate();
        closed
    }

    async fn close_record(&self, mut record: AttendanceRecord) -> anyhow::Result<()> {
        record.close(AUTO_CHECKOUT_TIME);
        match self.repo.update(&record).await {
            Ok(()) => {
                self.metrics.record_auto_checkout();
                self.audit.write_transition(AUDIT_AUTO_CHECKOUT, &record);
                info!(
                    member_id = %record.member_id,
                    record_id = %record.id,
                    "auto_checkout_closed"
                );
                Ok(())
            }
            Err(e) => {
                self.metrics.record_storage_error();
                error!(
                    member_id = %record.member_id,
                    record_id = %record.id,
                    error = %e,
                    "auto_checkout_update_failed"
                );
                Err(e)
            }
        }
    }
}

impl AutoCheckoutHandle {
    /// Cancel future firings; wait the grace period for an in-flight sweep
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);

        let abort_handle = self.handle.abort_handle();
        match tokio::time::timeout(self.shutdown_grace, self.handle).await {
            Ok(Ok(())) => info!("auto_checkout_shutdown_complete"),
            Ok(Err(e)) => warn!(error = %e, "auto_checkout_join_failed"),
            Err(_) => {
                abort_handle.abort();
                warn!(
                    grace_secs = %self.shutdown_grace.as_secs(),
                    "auto_checkout_shutdown_timeout: task aborted"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Member, MemberId};
    use crate::io::directory::RosterDirectory;
    use crate::io::repository::MemoryRepository;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime};
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn open_record(id: &str) -> AttendanceRecord {
        AttendanceRecord::open(MemberId::from(id), date(), time(9, 0))
    }

    fn member(id: &str) -> Member {
        Member {
            id: MemberId::from(id),
            name: "Test".to_string(),
            surname: id.to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            template: None,
        }
    }

    fn create_job(repo: Arc<dyn AttendanceRepository>) -> (AutoCheckout, TempDir) {
        let directory = Arc::new(RosterDirectory::from_members(vec![member("A1")]));
        let metrics = Arc::new(Metrics::new());
        let occupancy = Arc::new(OccupancyCache::new(
            repo.clone(),
            directory,
            metrics.clone(),
            Duration::from_secs(10),
        ));
        let audit_dir = TempDir::new().unwrap();
        let audit =
            Arc::new(AuditLog::new(audit_dir.path().join("a.jsonl").to_str().unwrap()));
        (AutoCheckout::new(repo, occupancy, audit, metrics, Duration::from_secs(5)), audit_dir)
    }

    #[test]
    fn test_delay_until_midnight() {
        let now = NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(23, 30, 0)
            .unwrap();
        assert_eq!(delay_until_midnight(now), Duration::from_secs(30 * 60));

        let midnight = NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(delay_until_midnight(midnight), Duration::from_secs(24 * 60 * 60));
    }

    #[tokio::test]
    async fn test_sweep_closes_open_and_leaves_closed_untouched() {
        let repo = Arc::new(MemoryRepository::new());
        let mut open_ids = Vec::new();
        for id in ["A1", "A2", "A3"] {
            let record = open_record(id);
            open_ids.push(record.id.clone());
            repo.create(&record).await.unwrap();
        }
        let mut closed_a = open_record("B1");
        closed_a.close(time(17, 45));
        let mut closed_b = open_record("B2");
        closed_b.close(time(18, 15));
        repo.create(&closed_a).await.unwrap();
        repo.create(&closed_b).await.unwrap();

        let (job, _audit_dir) = create_job(repo.clone());
        let closed = job.sweep().await;

        assert_eq!(closed, 3);
        assert_eq!(repo.count_open().await.unwrap(), 0);

        // Formerly-open records carry the midnight sentinel
        for id in &open_ids {
            assert_eq!(repo.get(id).unwrap().exit, Some(AUTO_CHECKOUT_TIME));
        }

        // Already-closed records keep their original exits
        assert_eq!(repo.get(&closed_a.id).unwrap().exit, Some(time(17, 45)));
        assert_eq!(repo.get(&closed_b.id).unwrap().exit, Some(time(18, 15)));
    }

    #[tokio::test]
    async fn test_sweep_on_empty_repository() {
        let repo = Arc::new(MemoryRepository::new());
        let (job, _audit_dir) = create_job(repo);
        assert_eq!(job.sweep().await, 0);
    }

    /// Repository whose updates fail for one specific member
    struct PartialFailRepository {
        inner: MemoryRepository,
        fail_member: MemberId,
    }

    #[async_trait]
    impl AttendanceRepository for PartialFailRepository {
        async fn find_open(
            &self,
            member_id: &MemberId,
        ) -> anyhow::Result<Option<AttendanceRecord>> {
            self.inner.find_open(member_id).await
        }

        async fn create(&self, record: &AttendanceRecord) -> anyhow::Result<()> {
            self.inner.create(record).await
        }

        async fn update(&self, record: &AttendanceRecord) -> anyhow::Result<()> {
            if record.member_id == self.fail_member {
                anyhow::bail!("storage unavailable");
            }
            self.inner.update(record).await
        }

        async fn count_open(&self) -> anyhow::Result<u64> {
            self.inner.count_open().await
        }

        async fn all_open(&self) -> anyhow::Result<Vec<AttendanceRecord>> {
            self.inner.all_open().await
        }

        async fn most_recent_open(&self) -> anyhow::Result<Option<AttendanceRecord>> {
            self.inner.most_recent_open().await
        }

        async fn most_recent_closed(&self) -> anyhow::Result<Option<AttendanceRecord>> {
            self.inner.most_recent_closed().await
        }
    }

    #[tokio::test]
    async fn test_sweep_continues_past_failing_record() {
        let repo = Arc::new(PartialFailRepository {
            inner: MemoryRepository::new(),
            fail_member: MemberId::from("A2"),
        });
        for id in ["A1", "A2", "A3"] {
            repo.create(&open_record(id)).await.unwrap();
        }

        let (job, _audit_dir) = create_job(repo.clone());
        let closed = job.sweep().await;

        // A2's update failed; the other two still closed
        assert_eq!(closed, 2);
        assert_eq!(repo.count_open().await.unwrap(), 1);
        assert!(repo.find_open(&MemberId::from("A2")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_start_stop_shutdown() {
        let repo = Arc::new(MemoryRepository::new());
        let (job, _audit_dir) = create_job(repo);

        let handle = job.start();
        // Stop before the first fire; shutdown completes within the grace
        tokio::time::timeout(Duration::from_secs(2), handle.stop())
            .await
            .expect("shutdown should be prompt");
    }
}
