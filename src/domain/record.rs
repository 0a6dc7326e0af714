//! Attendance record data model
//!
//! One record per visit: entry timestamp set on check-in, exit timestamp
//! set on check-out (or by the midnight sweep). A record with no exit is
//! "open" and means the member is currently inside.

use crate::domain::types::MemberId;
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_record_id() -> String {
    Uuid::now_v7().to_string()
}

/// How a record was closed, carried in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Member checked out (biometric or manual)
    CheckOut,
    /// Force-closed by the midnight sweep
    AutoCheckout,
}

/// One entry/exit pair for a member on a date
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    /// UUIDv7 record id
    pub id: String,
    pub member_id: MemberId,
    pub date: NaiveDate,
    pub entry: NaiveTime,
    /// None while the member is inside
    pub exit: Option<NaiveTime>,
}

impl AttendanceRecord {
    /// Open a new record: entry set, exit empty
    pub fn open(member_id: MemberId, date: NaiveDate, entry: NaiveTime) -> Self {
        Self { id: new_record_id(), member_id, date, entry, exit: None }
    }

    /// True while the member is inside
    #[inline]
    pub fn is_open(&self) -> bool {
        self.exit.is_none()
    }

    /// Set the exit timestamp, closing the record
    pub fn close(&mut self, exit: NaiveTime) {
        self.exit = Some(exit);
    }

    /// Serialize to a single JSON line for the audit trail
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
