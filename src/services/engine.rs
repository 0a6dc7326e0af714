//! Attendance state machine
//!
//! `record_presence` is the single write path for member transitions:
//! no open record means check-in (create), an open record means check-out
//! (set exit and update). The repository invariant is at most one open
//! record per member; a per-member lock serializes the read-then-write
//! sequence so concurrent calls for the same member cannot both observe
//! "no open record".

use crate::domain::record::AttendanceRecord;
use crate::domain::types::{MemberId, PresenceOutcome};
use crate::infra::metrics::Metrics;
use crate::io::audit::{AuditLog, AUDIT_ENTERED, AUDIT_EXITED};
use crate::io::directory::MemberDirectory;
use crate::io::repository::AttendanceRepository;
use chrono::{Local, NaiveDate, NaiveTime};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::services::occupancy::OccupancyCache;

/// Owns the check-in/check-out state machine
pub struct AttendanceEngine {
    repo: Arc<dyn AttendanceRepository>,
    directory: Arc<dyn MemberDirectory>,
    occupancy: Arc<OccupancyCache>,
    audit: Arc<AuditLog>,
    metrics: Arc<Metrics>,
    /// Per-member locks serializing read-then-write for one member
    member_locks: Mutex<FxHashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AttendanceEngine {
    pub fn new(
        repo: Arc<dyn AttendanceRepository>,
        directory: Arc<dyn MemberDirectory>,
        occupancy: Arc<OccupancyCache>,
        audit: Arc<AuditLog>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repo,
            directory,
            occupancy,
            audit,
            metrics,
            member_locks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Record a presence transition for a member at the current wall clock
    pub async fn record_presence(&self, member_id: &MemberId) -> anyhow::Result<PresenceOutcome> {
        let now = Local::now().naive_local();
        self.record_presence_at(member_id, now.date(), now.time()).await
    }

    /// Record a presence transition at an explicit date and time
    ///
    /// An unknown member is a no-op outcome, not an error. Storage
    /// failures are surfaced to the caller; the single-record write is
    /// atomic at the storage layer, so there is no partial state.
    pub async fn record_presence_at(
        &self,
        member_id: &MemberId,
        date: NaiveDate,
        time: NaiveTime,
    ) -> anyhow::Result<PresenceOutcome> {
        let member = match self.directory.find_member(member_id).await? {
            Some(member) => member,
            None => {
                self.metrics.record_unknown_member();
                warn!(member_id = %member_id, "presence_unknown_member");
                return Ok(PresenceOutcome::UnknownMember);
            }
        };

        let lock = self.member_lock(member_id);
        let _guard = lock.lock().await;

        let open = match self.repo.find_open(member_id).await {
            Ok(open) => open,
            Err(e) => {
                self.metrics.record_storage_error();
                return Err(e);
            }
        };

        match open {
            None => {
                let record = AttendanceRecord::open(member_id.clone(), date, time);
                if let Err(e) = self.repo.create(&record).await {
                    self.metrics.record_storage_error();
                    return Err(e);
                }
                self.metrics.record_entry();
                self.audit.write_transition(AUDIT_ENTERED, &record);
                self.occupancy.invalidate();
                info!(
                    member_id = %member_id,
                    member = %member.display_name(),
                    entry = %time,
                    "member_entered"
                );
                Ok(PresenceOutcome::Entered(record))
            }
            Some(mut record) => {
                record.close(time);
                if let Err(e) = self.repo.update(&record).await {
                    self.metrics.record_storage_error();
                    return Err(e);
                }
                self.metrics.record_exit();
                self.audit.write_transition(AUDIT_EXITED, &record);
                self.occupancy.invalidate();
                info!(
                    member_id = %member_id,
                    member = %member.display_name(),
                    exit = %time,
                    "member_exited"
                );
                Ok(PresenceOutcome::Exited(record))
            }
        }
    }

    fn member_lock(&self, member_id: &MemberId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.member_locks.lock();
        locks
            .entry(member_id.0.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Member;
    use crate::io::directory::RosterDirectory;
    use crate::io::repository::MemoryRepository;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    fn member(id: &str) -> Member {
        Member {
            id: MemberId::from(id),
            name: "Test".to_string(),
            surname: id.to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            template: None,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    struct TestEngine {
        engine: AttendanceEngine,
        repo: Arc<MemoryRepository>,
        #[allow(dead_code)]
        audit_dir: TempDir,
    }

    fn create_test_engine(members: Vec<Member>) -> TestEngine {
        create_test_engine_with_repo(Arc::new(MemoryRepository::new()), members)
    }

    fn create_test_engine_with_repo(
        repo: Arc<MemoryRepository>,
        members: Vec<Member>,
    ) -> TestEngine {
        let directory = Arc::new(RosterDirectory::from_members(members));
        let metrics = Arc::new(Metrics::new());
        let occupancy = Arc::new(OccupancyCache::new(
            repo.clone(),
            directory.clone(),
            metrics.clone(),
            Duration::from_secs(10),
        ));
        let audit_dir = TempDir::new().unwrap();
        let audit_path = audit_dir.path().join("attendance.jsonl");
        let audit = Arc::new(AuditLog::new(audit_path.to_str().unwrap()));
        let engine = AttendanceEngine::new(repo.clone(), directory, occupancy, audit, metrics);
        TestEngine { engine, repo, audit_dir }
    }

    #[tokio::test]
    async fn test_first_call_enters_second_exits() {
        let t = create_test_engine(vec![member("A42")]);
        let id = MemberId::from("A42");

        let outcome = t.engine.record_presence_at(&id, date(), time(9, 0)).await.unwrap();
        let entered = match outcome {
            PresenceOutcome::Entered(r) => r,
            other => panic!("expected entered, got {}", other.as_str()),
        };
        assert!(entered.is_open());
        assert_eq!(entered.entry, time(9, 0));

        let outcome = t.engine.record_presence_at(&id, date(), time(9, 5)).await.unwrap();
        let exited = match outcome {
            PresenceOutcome::Exited(r) => r,
            other => panic!("expected exited, got {}", other.as_str()),
        };
        assert_eq!(exited.id, entered.id);
        assert_eq!(exited.entry, time(9, 0));
        assert_eq!(exited.exit, Some(time(9, 5)));
        assert!(exited.entry <= exited.exit.unwrap());
    }

    #[tokio::test]
    async fn test_at_most_one_open_record_per_member() {
        let t = create_test_engine(vec![member("A42")]);
        let id = MemberId::from("A42");

        for i in 0..6 {
            t.engine.record_presence_at(&id, date(), time(9, i)).await.unwrap();
            let open: Vec<_> = t
                .repo
                .all_open()
                .await
                .unwrap()
                .into_iter()
                .filter(|r| r.member_id == id)
                .collect();
            assert!(open.len() <= 1, "more than one open record after call {i}");
        }
        // Six alternating calls end with the member outside
        assert_eq!(t.repo.count_open().await.unwrap(), 0);
        assert_eq!(t.repo.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_member_is_noop() {
        let t = create_test_engine(vec![member("A42")]);

        let outcome =
            t.engine.record_presence_at(&MemberId::from("Z9"), date(), time(9, 0)).await.unwrap();
        assert_eq!(outcome, PresenceOutcome::UnknownMember);
        assert!(t.repo.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_calls_for_one_member_serialize() {
        let t = create_test_engine(vec![member("A42")]);
        let engine = Arc::new(t.engine);
        let id = MemberId::from("A42");

        let (a, b) = tokio::join!(
            engine.record_presence_at(&id, date(), time(9, 0)),
            engine.record_presence_at(&id, date(), time(9, 0)),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        // One call entered, the other exited; never two entries
        let entered = [&a, &b]
            .iter()
            .filter(|o| matches!(o, PresenceOutcome::Entered(_)))
            .count();
        let exited = [&a, &b]
            .iter()
            .filter(|o| matches!(o, PresenceOutcome::Exited(_)))
            .count();
        assert_eq!((entered, exited), (1, 1));
        assert_eq!(t.repo.len(), 1);
        assert_eq!(t.repo.count_open().await.unwrap(), 0);
    }

    /// Repository wrapper whose writes always fail
    struct FailingRepository {
        inner: MemoryRepository,
    }

    #[async_trait]
    impl AttendanceRepository for FailingRepository {
        async fn find_open(
            &self,
            member_id: &MemberId,
        ) -> anyhow::Result<Option<AttendanceRecord>> {
            self.inner.find_open(member_id).await
        }

        async fn create(&self, _record: &AttendanceRecord) -> anyhow::Result<()> {
            anyhow::bail!("storage unavailable")
        }

        async fn update(&self, _record: &AttendanceRecord) -> anyhow::Result<()> {
            anyhow::bail!("storage unavailable")
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
    async fn test_storage_failure_surfaces_to_caller() {
        let repo = Arc::new(FailingRepository { inner: MemoryRepository::new() });
        let directory = Arc::new(RosterDirectory::from_members(vec![member("A42")]));
        let metrics = Arc::new(Metrics::new());
        let occupancy = Arc::new(OccupancyCache::new(
            repo.clone(),
            directory.clone(),
            metrics.clone(),
            Duration::from_secs(10),
        ));
        let audit_dir = TempDir::new().unwrap();
        let audit =
            Arc::new(AuditLog::new(audit_dir.path().join("a.jsonl").to_str().unwrap()));
        let engine = AttendanceEngine::new(repo, directory, occupancy, audit, metrics.clone());

        let result = engine.record_presence_at(&MemberId::from("A42"), date(), time(9, 0)).await;
        assert!(result.is_err());
        assert_eq!(metrics.report().storage_errors_total, 1);
    }
}
