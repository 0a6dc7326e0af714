//! Attendance audit trail - writes presence transitions to file
//!
//! Transitions are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::record::AttendanceRecord;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Audit event kinds
pub const AUDIT_ENTERED: &str = "entered";
pub const AUDIT_EXITED: &str = "exited";
pub const AUDIT_AUTO_CHECKOUT: &str = "auto_checkout";

/// Append-only audit writer for presence transitions
pub struct AuditLog {
    file_path: String,
}

impl AuditLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "audit_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write one transition to the audit file
    /// Returns true if successful, false otherwise
    pub fn write_transition(&self, event: &str, record: &AttendanceRecord) -> bool {
        let line = serde_json::json!({
            "event": event,
            "record_id": record.id,
            "member_id": record.member_id,
            "date": record.date,
            "entry": record.entry,
            "exit": record.exit,
        })
        .to_string();

        match self.append_line(&line) {
            Ok(()) => {
                info!(
                    event = %event,
                    member_id = %record.member_id,
                    record_id = %record.id,
                    "audit_written"
                );
                true
            }
            Err(e) => {
                error!(
                    event = %event,
                    member_id = %record.member_id,
                    error = %e,
                    "audit_write_failed"
                );
                false
            }
        }
    }

    /// Append a line to the audit file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "audit_line_appended");

        Ok(())
    }
}
