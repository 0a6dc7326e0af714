//! Member directory and roster loading
//!
//! The directory is the read-only member collaborator: it resolves members
//! by id, reports the member total, and supplies the candidate set for
//! biometric verification. The default implementation loads a TOML roster
//! file with base64-encoded templates at startup.

use crate::domain::types::{Member, MemberId, Template};
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// One member/template pair for 1:N verification
#[derive(Debug, Clone)]
pub struct Candidate {
    pub member: Member,
    pub template: Template,
}

/// Read-only member collaborator
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Resolve a member by id
    async fn find_member(&self, id: &MemberId) -> anyhow::Result<Option<Member>>;

    /// Every member with a stored template, in stable roster order
    async fn list_candidates(&self) -> anyhow::Result<Vec<Candidate>>;

    /// Total registered members
    async fn member_count(&self) -> anyhow::Result<u64>;
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    members: Vec<RosterMember>,
}

#[derive(Debug, Deserialize)]
struct RosterMember {
    id: String,
    name: String,
    surname: String,
    date_of_birth: NaiveDate,
    /// Base64-encoded biometric template; absent for manual-only members
    #[serde(default)]
    template: Option<String>,
}

/// In-memory directory backed by a roster file
///
/// Member order is the roster file order; the candidate scan relies on
/// this order being stable across calls.
pub struct RosterDirectory {
    members: Vec<Member>,
    index_by_id: FxHashMap<String, usize>,
}

impl RosterDirectory {
    /// Load a roster TOML file, decoding templates
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read roster file {}", path.display()))?;

        let roster: RosterFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse roster file {}", path.display()))?;

        let mut members = Vec::with_capacity(roster.members.len());
        for entry in roster.members {
            let template = match entry.template {
                Some(encoded) => Some(Template::new(
                    STANDARD
                        .decode(encoded.as_bytes())
                        .with_context(|| format!("Invalid template for member {}", entry.id))?,
                )),
                None => None,
            };
            members.push(Member {
                id: MemberId::new(entry.id),
                name: entry.name,
                surname: entry.surname,
                date_of_birth: entry.date_of_birth,
                template,
            });
        }

        let directory = Self::from_members(members);
        info!(
            roster_file = %path.display(),
            members = %directory.members.len(),
            with_template = %directory.members.iter().filter(|m| m.template.is_some()).count(),
            "roster_loaded"
        );
        Ok(directory)
    }

    /// Build a directory from an in-memory member list (tests, embedding)
    pub fn from_members(members: Vec<Member>) -> Self {
        let index_by_id =
            members.iter().enumerate().map(|(i, m)| (m.id.0.clone(), i)).collect();
        Self { members, index_by_id }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl MemberDirectory for RosterDirectory {
    async fn find_member(&self, id: &MemberId) -> anyhow::Result<Option<Member>> {
        Ok(self.index_by_id.get(&id.0).map(|&i| self.members[i].clone()))
    }

    async fn list_candidates(&self) -> anyhow::Result<Vec<Candidate>> {
        Ok(self
            .members
            .iter()
            .filter_map(|m| {
                m.template
                    .as_ref()
                    .map(|t| Candidate { member: m.clone(), template: t.clone() })
            })
            .collect())
    }

    async fn member_count(&self) -> anyhow::Result<u64> {
        Ok(self.members.len() as u64)
    }
}
