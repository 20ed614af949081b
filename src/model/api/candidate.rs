use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::db::{Candidate, CandidateId};

/// A candidate as shown to the public, without any tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub id: CandidateId,
    pub name: String,
    pub party: String,
    pub position: String,
    pub description: String,
    pub photo_reference: Option<String>,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            name: candidate.spec.name,
            party: candidate.spec.party,
            position: candidate.spec.position,
            description: candidate.spec.description,
            photo_reference: candidate.spec.photo_reference,
        }
    }
}

/// A candidate as shown to admins, with its running tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateWithTally {
    #[serde(flatten)]
    pub candidate: CandidateDescription,
    pub vote_count: u64,
    pub created_at: DateTime<Utc>,
}

impl From<Candidate> for CandidateWithTally {
    fn from(candidate: Candidate) -> Self {
        let vote_count = candidate.vote_count;
        let created_at = candidate.created_at;
        Self {
            candidate: candidate.into(),
            vote_count,
            created_at,
        }
    }
}
