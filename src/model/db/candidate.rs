use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::db::CandidateId;

/// Everything an admin supplies when adding a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    pub party: String,
    pub position: String,
    #[serde(default)]
    pub description: String,
    /// Opaque pointer to an externally hosted photo.
    #[serde(default)]
    pub photo_reference: Option<String>,
}

impl CandidateSpec {
    /// The first required field left blank, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("name", &self.name),
            ("party", &self.party),
            ("position", &self.position),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
    }
}

/// A candidate from the database, with its running tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: CandidateId,
    #[serde(flatten)]
    pub spec: CandidateSpec,
    /// Only ever changed by an atomic increment.
    pub vote_count: u64,
    pub created_at: DateTime<Utc>,
    /// Insertion order.
    pub seq: u64,
}

impl Candidate {
    pub fn new(id: CandidateId, spec: CandidateSpec, seq: u64) -> Self {
        Self {
            id,
            spec,
            vote_count: 0,
            created_at: Utc::now(),
            seq,
        }
    }
}

impl Deref for Candidate {
    type Target = CandidateSpec;

    fn deref(&self) -> &Self::Target {
        &self.spec
    }
}
