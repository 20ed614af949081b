//! Storage for the voter registry, candidate ledger, vote ledger and login
//! accounts.
//!
//! Each table is reached through its own trait so the coordinator never
//! depends on a particular backend. Two backends implement all of them:
//! [`memory::MemoryStore`] and [`mongo::MongoStore`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mongodb::error::Error as DbError;
use thiserror::Error;

use crate::model::{
    db::{
        Account, Candidate, CandidateId, CandidateSpec, Role, VoteRecord, Voter, VoterId,
        VoterProfile,
    },
    mongodb::is_duplicate_key_error,
};

pub mod memory;
pub mod mongo;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,
    #[error("Record already exists")]
    Conflict,
    #[error("Voter has already voted")]
    AlreadyVoted,
    #[error("Store lock poisoned")]
    LockFailed,
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Db(DbError),
    #[error(transparent)]
    Bson(#[from] mongodb::bson::ser::Error),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if is_duplicate_key_error(&err) {
            Self::Conflict
        } else {
            Self::Db(err)
        }
    }
}

/// One record per registered user, voters and admins alike.
#[rocket::async_trait]
pub trait VoterRegistry: Send + Sync {
    async fn get(&self, voter_id: VoterId) -> Result<Voter, StoreError>;

    /// Register a new voter who has not voted. Fails with
    /// [`StoreError::Conflict`] if the ID or email is already present.
    async fn create(&self, voter_id: VoterId, profile: VoterProfile) -> Result<Voter, StoreError>;

    /// Flip `has_voted` from false to true, atomically per voter.
    /// Fails with [`StoreError::AlreadyVoted`] if the flag was already set.
    async fn mark_voted(&self, voter_id: VoterId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// All voters in registration order.
    async fn list(&self) -> Result<Vec<Voter>, StoreError>;

    async fn count_by_role(&self, role: Role) -> Result<u64, StoreError>;

    async fn count_voted(&self) -> Result<u64, StoreError>;
}

/// Candidates and their running tallies.
#[rocket::async_trait]
pub trait CandidateLedger: Send + Sync {
    async fn get(&self, candidate_id: CandidateId) -> Result<Candidate, StoreError>;

    /// All candidates in insertion order.
    async fn list(&self) -> Result<Vec<Candidate>, StoreError>;

    /// Add a candidate with a fresh ID and no votes.
    async fn create(&self, spec: CandidateSpec) -> Result<Candidate, StoreError>;

    /// Linearizable increment, returning the new count.
    async fn increment_vote(&self, candidate_id: CandidateId) -> Result<u64, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

/// Append-only record of cast votes, at most one per voter.
#[rocket::async_trait]
pub trait VoteLedger: Send + Sync {
    /// Insert-if-absent on `voter_id`. Fails with [`StoreError::Conflict`]
    /// if the voter already has a record.
    async fn append(
        &self,
        voter_id: VoterId,
        candidate_id: CandidateId,
        at: DateTime<Utc>,
    ) -> Result<VoteRecord, StoreError>;

    async fn find_by_voter(&self, voter_id: VoterId) -> Result<Option<VoteRecord>, StoreError>;

    async fn count_for(&self, candidate_id: CandidateId) -> Result<u64, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    /// Every record, oldest first.
    async fn list(&self) -> Result<Vec<VoteRecord>, StoreError>;
}

/// Password accounts for the identity provider.
#[rocket::async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] if the email is taken.
    async fn insert(&self, account: Account) -> Result<(), StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;
}

/// Handles on every table, managed as Rocket state.
#[derive(Clone)]
pub struct Stores {
    pub voters: Arc<dyn VoterRegistry>,
    pub candidates: Arc<dyn CandidateLedger>,
    pub ledger: Arc<dyn VoteLedger>,
    pub accounts: Arc<dyn AccountStore>,
}

impl Stores {
    /// Use a single backend for every table.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: VoterRegistry + CandidateLedger + VoteLedger + AccountStore + 'static,
    {
        Self {
            voters: store.clone(),
            candidates: store.clone(),
            ledger: store.clone(),
            accounts: store,
        }
    }
}
