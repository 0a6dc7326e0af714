//! Attendance record storage seam
//!
//! The engine only sees this trait; the in-memory implementation backs the
//! default binary and the test suites. A database-backed implementation is
//! a collaborator concern and lives outside this crate.

use crate::domain::record::AttendanceRecord;
use crate::domain::types::MemberId;
use anyhow::bail;
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Storage operations the engine and read-side need
///
/// Single-record writes are atomic at the storage layer; failures are
/// surfaced to the caller and never retried here.
#[async_trait]
pub trait AttendanceRepository: Send + Sync {
    /// The open record for a member, if any
    async fn find_open(&self, member_id: &MemberId) -> anyhow::Result<Option<AttendanceRecord>>;

    /// Persist a new record
    async fn create(&self, record: &AttendanceRecord) -> anyhow::Result<()>;

    /// Persist changes to an existing record
    async fn update(&self, record: &AttendanceRecord) -> anyhow::Result<()>;

    /// Number of open records (members currently inside)
    async fn count_open(&self) -> anyhow::Result<u64>;

    /// Every open record, for the midnight sweep
    async fn all_open(&self) -> anyhow::Result<Vec<AttendanceRecord>>;

    /// The open record with the latest entry timestamp
    async fn most_recent_open(&self) -> anyhow::Result<Option<AttendanceRecord>>;

    /// The closed record with the latest exit timestamp
    async fn most_recent_closed(&self) -> anyhow::Result<Option<AttendanceRecord>>;
}

/// In-memory repository
///
/// Records keyed by record id; lookups scan, which is fine at facility
/// scale (hundreds of members, tens of open records).
pub struct MemoryRepository {
    records: RwLock<FxHashMap<String, AttendanceRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self { records: RwLock::new(FxHashMap::default()) }
    }

    /// Total records ever stored (open and closed)
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Fetch a record by id regardless of open/closed state
    pub fn get(&self, record_id: &str) -> Option<AttendanceRecord> {
        self.records.read().get(record_id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttendanceRepository for MemoryRepository {
    async fn find_open(&self, member_id: &MemberId) -> anyhow::Result<Option<AttendanceRecord>> {
        let records = self.records.read();
        // Latest first, matching the storage query ORDER BY date, entry DESC
        Ok(records
            .values()
            .filter(|r| r.is_open() && &r.member_id == member_id)
            .max_by_key(|r| (r.date, r.entry))
            .cloned())
    }

    async fn create(&self, record: &AttendanceRecord) -> anyhow::Result<()> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            bail!("record {} already exists", record.id);
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &AttendanceRecord) -> anyhow::Result<()> {
        let mut records = self.records.write();
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => bail!("record {} not found", record.id),
        }
    }

    async fn count_open(&self) -> anyhow::Result<u64> {
        Ok(self.records.read().values().filter(|r| r.is_open()).count() as u64)
    }

    async fn all_open(&self) -> anyhow::Result<Vec<AttendanceRecord>> {
        Ok(self.records.read().values().filter(|r| r.is_open()).cloned().collect())
    }

    async fn most_recent_open(&self) -> anyhow::Result<Option<AttendanceRecord>> {
        let records = self.records.read();
        Ok(records
            .values()
            .filter(|r| r.is_open())
            .max_by_key(|r| (r.date, r.entry))
            .cloned())
    }

    async fn most_recent_closed(&self) -> anyhow::Result<Option<AttendanceRecord>> {
        let records = self.records.read();
        Ok(records
            .values()
            .filter(|r| !r.is_open())
            .max_by_key(|r| (r.date, r.exit))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_find_open() {
        let repo = MemoryRepository::new();
        let record = AttendanceRecord::open(MemberId::from("A42"), date(10), time(9, 0));
        repo.create(&record).await.unwrap();

        let found = repo.find_open(&MemberId::from("A42")).await.unwrap();
        assert_eq!(found, Some(record));
        assert!(repo.find_open(&MemberId::from("B7")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_id_fails() {
        let repo = MemoryRepository::new();
        let record = AttendanceRecord::open(MemberId::from("A42"), date(10), time(9, 0));
        repo.create(&record).await.unwrap();
        assert!(repo.create(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_update_unknown_record_fails() {
        let repo = MemoryRepository::new();
        let record = AttendanceRecord::open(MemberId::from("A42"), date(10), time(9, 0));
        assert!(repo.update(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_update_closes_record() {
        let repo = MemoryRepository::new();
        let mut record = AttendanceRecord::open(MemberId::from("A42"), date(10), time(9, 0));
        repo.create(&record).await.unwrap();

        record.close(time(11, 30));
        repo.update(&record).await.unwrap();

        assert!(repo.find_open(&MemberId::from("A42")).await.unwrap().is_none());
        assert_eq!(repo.count_open().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_counts_and_all_open() {
        let repo = MemoryRepository::new();
        for (id, d) in [("A1", 10), ("A2", 10), ("A3", 11)] {
            let record = AttendanceRecord::open(MemberId::from(id), date(d), time(9, 0));
            repo.create(&record).await.unwrap();
        }
        let mut closed = AttendanceRecord::open(MemberId::from("A4"), date(9), time(8, 0));
        closed.close(time(10, 0));
        repo.create(&closed).await.unwrap();

        assert_eq!(repo.count_open().await.unwrap(), 3);
        assert_eq!(repo.all_open().await.unwrap().len(), 3);
        assert_eq!(repo.len(), 4);
    }

    #[tokio::test]
    async fn test_most_recent_open_and_closed() {
        let repo = MemoryRepository::new();

        let early = AttendanceRecord::open(MemberId::from("A1"), date(10), time(8, 0));
        let late = AttendanceRecord::open(MemberId::from("A2"), date(10), time(9, 45));
        repo.create(&early).await.unwrap();
        repo.create(&late).await.unwrap();

        let mut closed_early = AttendanceRecord::open(MemberId::from("A3"), date(10), time(7, 0));
        closed_early.close(time(9, 0));
        let mut closed_late = AttendanceRecord::open(MemberId::from("A4"), date(10), time(7, 30));
        closed_late.close(time(9, 30));
        repo.create(&closed_early).await.unwrap();
        repo.create(&closed_late).await.unwrap();

        assert_eq!(repo.most_recent_open().await.unwrap().unwrap().member_id, MemberId::from("A2"));
        assert_eq!(
            repo.most_recent_closed().await.unwrap().unwrap().member_id,
            MemberId::from("A4")
        );
    }
}
