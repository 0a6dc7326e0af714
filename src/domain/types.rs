//! Shared types for presence tracking

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Newtype wrapper for member identifiers to provide type safety
///
/// Member ids are opaque strings assigned at registration (e.g. "A42").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A raw sensor capture, opaque to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample(pub Vec<u8>);

impl Sample {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A stored biometric feature representation used for 1:N verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template(pub Vec<u8>);

impl Template {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Features extracted from a sample, ready for verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSet(pub Vec<u8>);

impl FeatureSet {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Membership tier derived from age, mirroring the card types issued
/// at the front desk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeCategory {
    Child,
    Youth,
    Adult,
}

impl AgeCategory {
    /// Category for an age in whole years: <12 child, <18 youth
    pub fn from_age(age: u32) -> Self {
        if age < 12 {
            AgeCategory::Child
        } else if age < 18 {
            AgeCategory::Youth
        } else {
            AgeCategory::Adult
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeCategory::Child => "child",
            AgeCategory::Youth => "youth",
            AgeCategory::Adult => "adult",
        }
    }
}

/// A registered member
///
/// Created and updated by external registration; read-only to the engine.
/// A member without a template can only be checked in/out manually.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub surname: String,
    pub date_of_birth: NaiveDate,
    pub template: Option<Template>,
}

impl Member {
    /// Full display name ("name surname")
    pub fn display_name(&self) -> String {
        format!("{} {}", self.name, self.surname)
    }

    /// Age in whole years on the given date
    pub fn age_on(&self, date: NaiveDate) -> u32 {
        date.years_since(self.date_of_birth).unwrap_or(0)
    }

    /// Membership tier on the given date
    pub fn age_category_on(&self, date: NaiveDate) -> AgeCategory {
        AgeCategory::from_age(self.age_on(date))
    }
}

/// Result of a presence transition, returned so callers can show a
/// confirmation message
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceOutcome {
    /// A new record was opened; the member is now inside
    Entered(crate::domain::record::AttendanceRecord),
    /// The open record was closed; the member is now outside
    Exited(crate::domain::record::AttendanceRecord),
    /// No member with the given id exists; nothing was written
    UnknownMember,
}

impl PresenceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceOutcome::Entered(_) => "entered",
            PresenceOutcome::Exited(_) => "exited",
            PresenceOutcome::UnknownMember => "unknown_member",
        }
    }
}
