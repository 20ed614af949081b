//! In-process backend. Every table sits behind its own [`Mutex`], and no
//! guard is ever held across an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::model::db::{
    Account, Candidate, CandidateId, CandidateSpec, Role, VoteRecord, Voter, VoterId,
    VoterProfile,
};

use super::{AccountStore, CandidateLedger, StoreError, VoteLedger, VoterRegistry};

/// A write that can be made to fail once, to exercise partial commits.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum FaultPoint {
    Append,
    MarkVoted,
    IncrementVote,
}

struct Table<K, V> {
    rows: HashMap<K, V>,
    next_seq: u64,
}

// `derive(Default)` would demand `V: Default`.
impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K, V> Table<K, V> {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

#[derive(Default)]
pub struct MemoryStore {
    voters: Mutex<Table<VoterId, Voter>>,
    candidates: Mutex<Table<CandidateId, Candidate>>,
    votes: Mutex<Table<VoterId, VoteRecord>>,
    accounts: Mutex<Table<String, Account>>,
    faults: Mutex<HashSet<FaultPoint>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::LockFailed)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write at `point` fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, point: FaultPoint) -> Result<(), StoreError> {
        lock(&self.faults)?.insert(point);
        Ok(())
    }

    fn check_fault(&self, point: FaultPoint) -> Result<(), StoreError> {
        if lock(&self.faults)?.remove(&point) {
            return Err(StoreError::Unavailable(format!("injected fault at {point:?}")));
        }
        Ok(())
    }

    /// Overwrite a candidate's tally directly, bypassing the ledger.
    #[cfg(test)]
    pub fn set_vote_count(&self, candidate_id: CandidateId, count: u64) {
        let mut candidates = self.candidates.lock().unwrap();
        candidates.rows.get_mut(&candidate_id).unwrap().vote_count = count;
    }
}

#[rocket::async_trait]
impl VoterRegistry for MemoryStore {
    async fn get(&self, voter_id: VoterId) -> Result<Voter, StoreError> {
        lock(&self.voters)?
            .rows
            .get(&voter_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create(&self, voter_id: VoterId, profile: VoterProfile) -> Result<Voter, StoreError> {
        let mut voters = lock(&self.voters)?;
        let taken = voters.rows.contains_key(&voter_id)
            || voters.rows.values().any(|v| v.email == profile.email);
        if taken {
            return Err(StoreError::Conflict);
        }
        let seq = voters.next_seq();
        let voter = Voter::new(voter_id, profile, seq);
        voters.rows.insert(voter_id, voter.clone());
        Ok(voter)
    }

    async fn mark_voted(&self, voter_id: VoterId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_fault(FaultPoint::MarkVoted)?;
        let mut voters = lock(&self.voters)?;
        let voter = voters.rows.get_mut(&voter_id).ok_or(StoreError::NotFound)?;
        if voter.has_voted {
            return Err(StoreError::AlreadyVoted);
        }
        voter.has_voted = true;
        voter.voted_at = Some(at);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Voter>, StoreError> {
        let mut voters: Vec<_> = lock(&self.voters)?.rows.values().cloned().collect();
        voters.sort_by_key(|v| v.seq);
        Ok(voters)
    }

    async fn count_by_role(&self, role: Role) -> Result<u64, StoreError> {
        let voters = lock(&self.voters)?;
        Ok(voters.rows.values().filter(|v| v.role == role).count() as u64)
    }

    async fn count_voted(&self) -> Result<u64, StoreError> {
        let voters = lock(&self.voters)?;
        Ok(voters.rows.values().filter(|v| v.has_voted).count() as u64)
    }
}

#[rocket::async_trait]
impl CandidateLedger for MemoryStore {
    async fn get(&self, candidate_id: CandidateId) -> Result<Candidate, StoreError> {
        lock(&self.candidates)?
            .rows
            .get(&candidate_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> Result<Vec<Candidate>, StoreError> {
        let mut candidates: Vec<_> = lock(&self.candidates)?.rows.values().cloned().collect();
        candidates.sort_by_key(|c| c.seq);
        Ok(candidates)
    }

    async fn create(&self, spec: CandidateSpec) -> Result<Candidate, StoreError> {
        let mut candidates = lock(&self.candidates)?;
        let seq = candidates.next_seq();
        let candidate = Candidate::new(CandidateId::new(), spec, seq);
        candidates.rows.insert(candidate.id, candidate.clone());
        Ok(candidate)
    }

    async fn increment_vote(&self, candidate_id: CandidateId) -> Result<u64, StoreError> {
        self.check_fault(FaultPoint::IncrementVote)?;
        let mut candidates = lock(&self.candidates)?;
        let candidate = candidates
            .rows
            .get_mut(&candidate_id)
            .ok_or(StoreError::NotFound)?;
        candidate.vote_count += 1;
        Ok(candidate.vote_count)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(lock(&self.candidates)?.rows.len() as u64)
    }
}

#[rocket::async_trait]
impl VoteLedger for MemoryStore {
    async fn append(
        &self,
        voter_id: VoterId,
        candidate_id: CandidateId,
        at: DateTime<Utc>,
    ) -> Result<VoteRecord, StoreError> {
        self.check_fault(FaultPoint::Append)?;
        let mut votes = lock(&self.votes)?;
        if votes.rows.contains_key(&voter_id) {
            return Err(StoreError::Conflict);
        }
        let seq = votes.next_seq();
        let record = VoteRecord::new(voter_id, candidate_id, at, seq);
        votes.rows.insert(voter_id, record.clone());
        Ok(record)
    }

    async fn find_by_voter(&self, voter_id: VoterId) -> Result<Option<VoteRecord>, StoreError> {
        Ok(lock(&self.votes)?.rows.get(&voter_id).cloned())
    }

    async fn count_for(&self, candidate_id: CandidateId) -> Result<u64, StoreError> {
        let votes = lock(&self.votes)?;
        Ok(votes
            .rows
            .values()
            .filter(|r| r.candidate_id == candidate_id)
            .count() as u64)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(lock(&self.votes)?.rows.len() as u64)
    }

    async fn list(&self) -> Result<Vec<VoteRecord>, StoreError> {
        let mut records: Vec<_> = lock(&self.votes)?.rows.values().cloned().collect();
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }
}

#[rocket::async_trait]
impl AccountStore for MemoryStore {
    async fn insert(&self, account: Account) -> Result<(), StoreError> {
        let mut accounts = lock(&self.accounts)?;
        if accounts.rows.contains_key(&account.email) {
            return Err(StoreError::Conflict);
        }
        accounts.rows.insert(account.email.clone(), account);
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(lock(&self.accounts)?.rows.get(email).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::Stores;

    fn stores() -> Stores {
        Stores::from_shared(Arc::new(MemoryStore::new()))
    }

    #[rocket::async_test]
    async fn voters_list_in_registration_order() {
        let stores = stores();
        let first = stores
            .voters
            .create(VoterId::new(), VoterProfile::example())
            .await
            .unwrap();
        let second = stores
            .voters
            .create(VoterId::new(), VoterProfile::example2())
            .await
            .unwrap();

        let listed = stores.voters.list().await.unwrap();
        assert_eq!(listed, vec![first, second]);
        assert!(listed.iter().all(|v| !v.has_voted && v.voted_at.is_none()));
    }

    #[rocket::async_test]
    async fn duplicate_voter_is_a_conflict() {
        let stores = stores();
        let id = VoterId::new();
        stores
            .voters
            .create(id, VoterProfile::example())
            .await
            .unwrap();

        let same_id = stores.voters.create(id, VoterProfile::example2()).await;
        assert!(matches!(same_id, Err(StoreError::Conflict)));

        let same_email = stores
            .voters
            .create(VoterId::new(), VoterProfile::example())
            .await;
        assert!(matches!(same_email, Err(StoreError::Conflict)));
    }

    #[rocket::async_test]
    async fn mark_voted_flips_once() {
        let stores = stores();
        let voter = stores
            .voters
            .create(VoterId::new(), VoterProfile::example())
            .await
            .unwrap();
        let at = Utc::now();

        stores.voters.mark_voted(voter.id, at).await.unwrap();
        let again = stores.voters.mark_voted(voter.id, Utc::now()).await;
        assert!(matches!(again, Err(StoreError::AlreadyVoted)));

        let voter = stores.voters.get(voter.id).await.unwrap();
        assert!(voter.has_voted);
        assert_eq!(voter.voted_at, Some(at));
        assert_eq!(stores.voters.count_voted().await.unwrap(), 1);

        let missing = stores.voters.mark_voted(VoterId::new(), at).await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[rocket::async_test]
    async fn counts_by_role() {
        let stores = stores();
        for profile in [
            VoterProfile::example(),
            VoterProfile::example2(),
            VoterProfile::example_admin(),
        ] {
            stores.voters.create(VoterId::new(), profile).await.unwrap();
        }
        assert_eq!(stores.voters.count_by_role(Role::Voter).await.unwrap(), 2);
        assert_eq!(stores.voters.count_by_role(Role::Admin).await.unwrap(), 1);
    }

    #[rocket::async_test]
    async fn candidates_keep_insertion_order_and_count() {
        let stores = stores();
        let first = stores
            .candidates
            .create(CandidateSpec::example())
            .await
            .unwrap();
        let second = stores
            .candidates
            .create(CandidateSpec::example2())
            .await
            .unwrap();
        assert_eq!(first.vote_count, 0);

        assert_eq!(stores.candidates.increment_vote(second.id).await.unwrap(), 1);
        assert_eq!(stores.candidates.increment_vote(second.id).await.unwrap(), 2);

        let listed = stores.candidates.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
        assert_eq!(listed[1].vote_count, 2);

        let missing = stores.candidates.increment_vote(CandidateId::new()).await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[rocket::async_test]
    async fn ledger_holds_one_record_per_voter() {
        let stores = stores();
        let voter = VoterId::new();
        let candidate = CandidateId::new();

        let record = stores
            .ledger
            .append(voter, candidate, Utc::now())
            .await
            .unwrap();
        let second = stores
            .ledger
            .append(voter, CandidateId::new(), Utc::now())
            .await;
        assert!(matches!(second, Err(StoreError::Conflict)));

        assert_eq!(
            stores.ledger.find_by_voter(voter).await.unwrap(),
            Some(record)
        );
        assert_eq!(stores.ledger.count_for(candidate).await.unwrap(), 1);
        assert_eq!(stores.ledger.count().await.unwrap(), 1);
        assert_eq!(
            stores.ledger.find_by_voter(VoterId::new()).await.unwrap(),
            None
        );
    }

    #[rocket::async_test]
    async fn ledger_lists_in_append_order_despite_equal_timestamps() {
        let stores = stores();
        let candidate = CandidateId::new();
        let at = Utc::now();

        let mut appended = Vec::new();
        for _ in 0..20 {
            let record = stores
                .ledger
                .append(VoterId::new(), candidate, at)
                .await
                .unwrap();
            appended.push(record);
        }

        assert_eq!(stores.ledger.list().await.unwrap(), appended);
    }

    #[rocket::async_test]
    async fn injected_faults_fire_once() {
        let store = MemoryStore::new();
        store.fail_next(FaultPoint::Append).unwrap();
        let voter = VoterId::new();

        let failed = store.append(voter, CandidateId::new(), Utc::now()).await;
        assert!(matches!(failed, Err(StoreError::Unavailable(_))));
        assert_eq!(VoteLedger::count(&store).await.unwrap(), 0);

        store
            .append(voter, CandidateId::new(), Utc::now())
            .await
            .unwrap();
    }

    #[rocket::async_test]
    async fn account_emails_are_unique() {
        let stores = stores();
        let account = Account {
            id: VoterId::new(),
            email: "ada@example.com".to_string(),
            password_hash: "hash".to_string(),
        };
        stores.accounts.insert(account.clone()).await.unwrap();

        let duplicate = Account {
            id: VoterId::new(),
            ..account.clone()
        };
        let result = stores.accounts.insert(duplicate).await;
        assert!(matches!(result, Err(StoreError::Conflict)));

        assert_eq!(
            stores
                .accounts
                .find_by_email("ada@example.com")
                .await
                .unwrap(),
            Some(account)
        );
    }
}
