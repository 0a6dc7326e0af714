//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `sensor` - Sample source seam and TCP sensor bridge
//! - `repository` - Attendance record storage seam + in-memory implementation
//! - `directory` - Member roster loading and candidate set
//! - `audit` - Attendance transitions to file (JSONL format)
//! - `http` - Operational HTTP endpoint (metrics, occupancy, manual presence)

pub mod audit;
pub mod directory;
pub mod http;
pub mod repository;
pub mod sensor;

// Re-export commonly used types
pub use audit::AuditLog;
pub use directory::{Candidate, MemberDirectory, RosterDirectory};
pub use repository::{AttendanceRepository, MemoryRepository};
pub use sensor::{start_sensor_listener, ChannelSource, SampleFeed, SampleSource, SensorListenerConfig};
