use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::db::{CandidateId, RecordId, VoteRecord};

/// Confirmation handed back to a voter whose vote was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub record_id: RecordId,
    pub candidate_id: CandidateId,
    pub cast_at: DateTime<Utc>,
}

impl From<VoteRecord> for VoteReceipt {
    fn from(record: VoteRecord) -> Self {
        Self {
            record_id: record.id,
            candidate_id: record.candidate_id,
            cast_at: record.cast_at,
        }
    }
}
