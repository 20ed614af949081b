use serde::{Deserialize, Serialize};

use crate::model::db::Role;
use crate::store::{StoreError, Stores};

/// Headline numbers for the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Registered users with the voter role.
    pub total_voters: u64,
    pub votes_cast: u64,
    pub remaining_voters: u64,
    pub total_candidates: u64,
    /// Should equal `votes_cast`; see the audit if it doesn't.
    pub ledger_records: u64,
}

impl Stats {
    pub async fn gather(stores: &Stores) -> Result<Self, StoreError> {
        let total_voters = stores.voters.count_by_role(Role::Voter).await?;
        let votes_cast = stores.voters.count_voted().await?;
        Ok(Self {
            total_voters,
            votes_cast,
            remaining_voters: total_voters.saturating_sub(votes_cast),
            total_candidates: stores.candidates.count().await?,
            ledger_records: stores.ledger.count().await?,
        })
    }
}
