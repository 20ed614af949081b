use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::db::{CandidateId, Role, Voter, VoterId};
use crate::verification::{Method, Verification};

/// A registered user as shown in the admin voters table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterDescription {
    pub id: VoterId,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub has_voted: bool,
    pub voted_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

impl From<Voter> for VoterDescription {
    fn from(voter: Voter) -> Self {
        Self {
            id: voter.id,
            full_name: voter.profile.full_name,
            email: voter.profile.email,
            role: voter.profile.role,
            has_voted: voter.has_voted,
            voted_at: voter.voted_at,
            registered_at: voter.registered_at,
        }
    }
}

/// Whether the signed-in voter has voted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteStatus {
    pub has_voted: bool,
    pub voted_at: Option<DateTime<Utc>>,
}

impl From<&Voter> for VoteStatus {
    fn from(voter: &Voter) -> Self {
        Self {
            has_voted: voter.has_voted,
            voted_at: voter.voted_at,
        }
    }
}

/// A request to vote for a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub candidate_id: CandidateId,
}

/// Progress towards a usable verification proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationStatus {
    pub verified: BTreeSet<Method>,
    pub remaining: BTreeSet<Method>,
    pub expires_at: DateTime<Utc>,
}

impl VerificationStatus {
    pub fn new(proof: &Verification, required: &BTreeSet<Method>) -> Self {
        Self {
            verified: proof.methods.clone(),
            remaining: required.difference(&proof.methods).copied().collect(),
            expires_at: proof.expires_at,
        }
    }
}
