//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `engine` - Attendance state machine (check-in/check-out transitions)
//! - `capture` - Continuous capture loop and its lifecycle
//! - `matcher` - Feature extraction and 1:N verification
//! - `presence_worker` - Match-event consumer driving the engine
//! - `occupancy` - TTL-cached occupancy snapshot for the dashboard
//! - `auto_checkout` - Midnight force-close of abandoned sessions

pub mod auto_checkout;
pub mod capture;
pub mod engine;
pub mod matcher;
pub mod occupancy;
pub mod presence_worker;

// Re-export commonly used types
pub use auto_checkout::{AutoCheckout, AutoCheckoutHandle};
pub use capture::CaptureService;
pub use engine::AttendanceEngine;
pub use matcher::{Matcher, SimilarityMatcher};
pub use occupancy::{OccupancyCache, OccupancySnapshot};
pub use presence_worker::{create_presence_worker, MatchEvent, PresenceWorker};
