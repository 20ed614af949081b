//! The vote transaction coordinator.
//!
//! Each attempt to vote is a [`VoteAttempt`] that moves through
//! `Pending → IdentityVerified → EligibilityChecked → Committed`, or ends in
//! `Rejected` (nothing was written) or `Failed` (a store error stopped it).
//!
//! A commit writes to three tables in a fixed order: the vote ledger, then
//! the voter registry, then the candidate tally. The ledger append is the
//! only serialization point: its unique key on the voter decides which of
//! several concurrent attempts wins. Writes after the append are never
//! retried inline, so a failure there leaves a desync that is logged under
//! [`RECONCILE_TARGET`] and reported by the audit.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::db::{CandidateId, Role, VoteRecord, VoterId};
use crate::store::{CandidateLedger, StoreError, Stores, VoteLedger, VoterRegistry};
use crate::verification::{Method, Verification};

/// Log target for anything that leaves the stores needing reconciliation.
pub const RECONCILE_TARGET: &str = "evote::reconcile";

/// Seconds after its ledger append during which a commit may still be
/// writing the registry flag.
const COMMIT_GRACE_SECS: i64 = 5;

/// Whether a ledger record cast at `cast_at` may belong to a commit that is
/// still running.
fn commit_may_be_in_flight(cast_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - cast_at < chrono::Duration::seconds(COMMIT_GRACE_SECS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Pending,
    IdentityVerified,
    EligibilityChecked,
    Committed,
    Rejected,
    Failed,
}

/// The commit step that failed after the vote was already in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStage {
    RegistryMark,
    TallyIncrement,
}

impl Display for CommitStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RegistryMark => write!(f, "registry mark"),
            Self::TallyIncrement => write!(f, "tally increment"),
        }
    }
}

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("Voter not found")]
    VoterNotFound,
    #[error("Candidate not found")]
    CandidateNotFound,
    #[error("Users with role {0} may not vote")]
    RoleNotEligible(Role),
    #[error("Voter has already voted")]
    AlreadyVoted,
    #[error("Identity not verified: {0}")]
    NotVerified(String),
    #[error("Vote recorded but {stage} failed: {source}")]
    PartiallyFailed {
        stage: CommitStage,
        source: StoreError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One voter's attempt to vote for one candidate.
#[derive(Debug)]
pub struct VoteAttempt {
    voter_id: VoterId,
    candidate_id: CandidateId,
    state: AttemptState,
}

impl VoteAttempt {
    pub fn new(voter_id: VoterId, candidate_id: CandidateId) -> Self {
        Self {
            voter_id,
            candidate_id,
            state: AttemptState::Pending,
        }
    }

    pub fn voter_id(&self) -> VoterId {
        self.voter_id
    }

    pub fn candidate_id(&self) -> CandidateId {
        self.candidate_id
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    fn advance(&mut self, next: AttemptState) {
        debug!(
            "Vote attempt by {}: {:?} -> {:?}",
            self.voter_id, self.state, next
        );
        self.state = next;
    }

    /// End the attempt, as `Rejected` if nothing went wrong with the stores.
    fn finish_with(&mut self, err: VoteError) -> VoteError {
        match err {
            VoteError::Store(_) | VoteError::PartiallyFailed { .. } => {
                error!("Vote attempt by {} failed: {err}", self.voter_id);
                self.advance(AttemptState::Failed);
            }
            _ => {
                warn!("Vote attempt by {} rejected: {err}", self.voter_id);
                self.advance(AttemptState::Rejected);
            }
        }
        err
    }
}

/// Drives vote attempts against the stores. Holds no per-attempt state.
pub struct Coordinator {
    voters: Arc<dyn VoterRegistry>,
    candidates: Arc<dyn CandidateLedger>,
    ledger: Arc<dyn VoteLedger>,
    required_methods: BTreeSet<Method>,
}

impl Coordinator {
    pub fn new(stores: &Stores, required_methods: BTreeSet<Method>) -> Self {
        Self {
            voters: stores.voters.clone(),
            candidates: stores.candidates.clone(),
            ledger: stores.ledger.clone(),
            required_methods,
        }
    }

    pub fn required_methods(&self) -> &BTreeSet<Method> {
        &self.required_methods
    }

    /// Move a pending attempt to `IdentityVerified` if `proof` belongs to its
    /// voter, is unexpired and covers every required method.
    pub fn verify_identity(
        &self,
        attempt: &mut VoteAttempt,
        proof: Option<&Verification>,
    ) -> Result<(), VoteError> {
        if attempt.state != AttemptState::Pending {
            return Err(VoteError::NotVerified(format!(
                "attempt is already {:?}",
                attempt.state
            )));
        }
        let checked = match proof {
            Some(proof) => proof.check(attempt.voter_id, &self.required_methods),
            None => Err("no verification presented".to_string()),
        };
        match checked {
            Ok(()) => {
                attempt.advance(AttemptState::IdentityVerified);
                Ok(())
            }
            Err(reason) => Err(attempt.finish_with(VoteError::NotVerified(reason))),
        }
    }

    /// Check eligibility and commit the vote.
    ///
    /// Early rejections never write anything. Once the ledger append
    /// succeeds the remaining writes all run; if any of them fails the
    /// result is [`VoteError::PartiallyFailed`] naming the first failed stage.
    pub async fn cast_vote(&self, attempt: &mut VoteAttempt) -> Result<VoteRecord, VoteError> {
        if attempt.state != AttemptState::IdentityVerified {
            return Err(VoteError::NotVerified(
                "identity has not been verified for this attempt".to_string(),
            ));
        }

        if let Err(err) = self.check_eligibility(attempt).await {
            return Err(attempt.finish_with(err));
        }
        attempt.advance(AttemptState::EligibilityChecked);

        match self.commit(attempt).await {
            Ok(record) => {
                attempt.advance(AttemptState::Committed);
                info!(
                    "Voter {} voted for candidate {} (record {})",
                    record.voter_id, record.candidate_id, record.id
                );
                Ok(record)
            }
            Err(err) => Err(attempt.finish_with(err)),
        }
    }

    async fn check_eligibility(&self, attempt: &VoteAttempt) -> Result<(), VoteError> {
        let voter = match self.voters.get(attempt.voter_id).await {
            Err(StoreError::NotFound) => return Err(VoteError::VoterNotFound),
            result => result?,
        };
        if voter.role != Role::Voter {
            return Err(VoteError::RoleNotEligible(voter.role));
        }
        if voter.has_voted {
            return Err(VoteError::AlreadyVoted);
        }

        if let Some(record) = self.ledger.find_by_voter(voter.id).await? {
            // Either a concurrent commit is between its append and its
            // registry write, or an earlier one stopped there. Restore the
            // flag, but leave the tally to reconciliation.
            if commit_may_be_in_flight(record.cast_at, Utc::now()) {
                log::debug!(
                    "Ledger record {} for voter {} is newer than its registry flag",
                    record.id,
                    voter.id
                );
            } else {
                log::warn!(
                    target: RECONCILE_TARGET,
                    "Ledger record {} exists for voter {} but the registry flag is unset; repairing",
                    record.id,
                    voter.id
                );
            }
            match self.voters.mark_voted(voter.id, record.cast_at).await {
                Ok(()) | Err(StoreError::AlreadyVoted) => {}
                Err(err) => log::error!(
                    target: RECONCILE_TARGET,
                    "Could not repair registry flag for voter {}: {err}",
                    voter.id
                ),
            }
            return Err(VoteError::AlreadyVoted);
        }

        match self.candidates.get(attempt.candidate_id).await {
            Err(StoreError::NotFound) => Err(VoteError::CandidateNotFound),
            result => result.map(|_| ()).map_err(VoteError::from),
        }
    }

    async fn commit(&self, attempt: &VoteAttempt) -> Result<VoteRecord, VoteError> {
        let now = Utc::now();
        let record = match self
            .ledger
            .append(attempt.voter_id, attempt.candidate_id, now)
            .await
        {
            Ok(record) => record,
            Err(StoreError::Conflict) => return Err(VoteError::AlreadyVoted),
            Err(err) => return Err(err.into()),
        };

        let mut first_failure = None;

        match self.voters.mark_voted(attempt.voter_id, now).await {
            // Someone repaired the flag from our record already.
            Ok(()) | Err(StoreError::AlreadyVoted) => {}
            Err(err) => {
                Self::log_desync(&record, CommitStage::RegistryMark, &err);
                first_failure = Some((CommitStage::RegistryMark, err));
            }
        }

        if let Err(err) = self.candidates.increment_vote(attempt.candidate_id).await {
            Self::log_desync(&record, CommitStage::TallyIncrement, &err);
            if first_failure.is_none() {
                first_failure = Some((CommitStage::TallyIncrement, err));
            }
        }

        match first_failure {
            None => Ok(record),
            Some((stage, source)) => Err(VoteError::PartiallyFailed { stage, source }),
        }
    }

    fn log_desync(record: &VoteRecord, stage: CommitStage, err: &StoreError) {
        log::error!(
            target: RECONCILE_TARGET,
            "Ledger record {} (voter {}, candidate {}) committed but {stage} failed: {err}",
            record.id,
            record.voter_id,
            record.candidate_id
        );
    }
}
