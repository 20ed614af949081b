use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::db::{CandidateId, RecordId, VoterId};

/// One entry of the append-only vote ledger. At most one exists per voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    #[serde(rename = "_id")]
    pub id: RecordId,
    pub voter_id: VoterId,
    pub candidate_id: CandidateId,
    pub cast_at: DateTime<Utc>,
    /// Append order.
    pub seq: u64,
}

impl VoteRecord {
    pub fn new(
        voter_id: VoterId,
        candidate_id: CandidateId,
        cast_at: DateTime<Utc>,
        seq: u64,
    ) -> Self {
        Self {
            id: RecordId::new(),
            voter_id,
            candidate_id,
            cast_at,
            seq,
        }
    }
}
