//! MongoDB backend. Atomicity comes from single-document operations:
//! conditional `update_one`, `$inc` through `find_one_and_update`, and the
//! unique indexes created by [`ensure_indexes_exist`].

use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, to_bson},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Client, Database,
};
use rocket::futures::TryStreamExt;

use crate::model::{
    db::{
        Account, Candidate, CandidateId, CandidateSpec, Role, VoteRecord, Voter, VoterId,
        VoterProfile,
    },
    mongodb::{
        ensure_indexes_exist, Coll, Counter, CANDIDATE_SEQ_COUNTER, RECORD_SEQ_COUNTER,
        VOTER_SEQ_COUNTER,
    },
};

use super::{AccountStore, CandidateLedger, StoreError, VoteLedger, VoterRegistry};

pub struct MongoStore {
    voters: Coll<Voter>,
    candidates: Coll<Candidate>,
    votes: Coll<VoteRecord>,
    accounts: Coll<Account>,
    counters: Coll<Counter>,
}

impl MongoStore {
    /// Connect to the given database, creating any missing indexes.
    pub async fn connect(db_uri: &str, db_name: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(db_uri).await?;
        let db = client.database(db_name);
        ensure_indexes_exist(&db).await?;
        Ok(Self::new(&db))
    }

    /// Wrap a database whose indexes already exist.
    pub fn new(db: &Database) -> Self {
        Self {
            voters: Coll::from_db(db),
            candidates: Coll::from_db(db),
            votes: Coll::from_db(db),
            accounts: Coll::from_db(db),
            counters: Coll::from_db(db),
        }
    }
}

fn in_order(field: &str) -> FindOptions {
    FindOptions::builder().sort(doc! { field: 1 }).build()
}

#[rocket::async_trait]
impl VoterRegistry for MongoStore {
    async fn get(&self, voter_id: VoterId) -> Result<Voter, StoreError> {
        self.voters
            .find_one(voter_id.as_doc(), None)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn create(&self, voter_id: VoterId, profile: VoterProfile) -> Result<Voter, StoreError> {
        let seq = Counter::next(&self.counters, VOTER_SEQ_COUNTER).await?;
        let voter = Voter::new(voter_id, profile, seq);
        self.voters.insert_one(&voter, None).await?;
        Ok(voter)
    }

    async fn mark_voted(&self, voter_id: VoterId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let filter = doc! {
            "_id": voter_id,
            "has_voted": false,
        };
        let update = doc! {
            "$set": {
                "has_voted": true,
                "voted_at": to_bson(&at)?,
            }
        };
        let result = self.voters.update_one(filter, update, None).await?;
        if result.matched_count == 0 {
            // Either the voter doesn't exist or the flag was already set.
            let exists = self.voters.count_documents(voter_id.as_doc(), None).await? > 0;
            return Err(if exists {
                StoreError::AlreadyVoted
            } else {
                StoreError::NotFound
            });
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Voter>, StoreError> {
        let voters = self
            .voters
            .find(None, in_order("seq"))
            .await?
            .try_collect()
            .await?;
        Ok(voters)
    }

    async fn count_by_role(&self, role: Role) -> Result<u64, StoreError> {
        Ok(self
            .voters
            .count_documents(doc! { "role": role }, None)
            .await?)
    }

    async fn count_voted(&self) -> Result<u64, StoreError> {
        Ok(self
            .voters
            .count_documents(doc! { "has_voted": true }, None)
            .await?)
    }
}

#[rocket::async_trait]
impl CandidateLedger for MongoStore {
    async fn get(&self, candidate_id: CandidateId) -> Result<Candidate, StoreError> {
        self.candidates
            .find_one(candidate_id.as_doc(), None)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> Result<Vec<Candidate>, StoreError> {
        let candidates = self
            .candidates
            .find(None, in_order("seq"))
            .await?
            .try_collect()
            .await?;
        Ok(candidates)
    }

    async fn create(&self, spec: CandidateSpec) -> Result<Candidate, StoreError> {
        let seq = Counter::next(&self.counters, CANDIDATE_SEQ_COUNTER).await?;
        let candidate = Candidate::new(CandidateId::new(), spec, seq);
        self.candidates.insert_one(&candidate, None).await?;
        Ok(candidate)
    }

    async fn increment_vote(&self, candidate_id: CandidateId) -> Result<u64, StoreError> {
        let update = doc! {
            "$inc": { "vote_count": 1_i64 }
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let candidate = self
            .candidates
            .find_one_and_update(candidate_id.as_doc(), update, options)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(candidate.vote_count)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.candidates.count_documents(None, None).await?)
    }
}

#[rocket::async_trait]
impl VoteLedger for MongoStore {
    async fn append(
        &self,
        voter_id: VoterId,
        candidate_id: CandidateId,
        at: DateTime<Utc>,
    ) -> Result<VoteRecord, StoreError> {
        // A conflicting append burns a sequence number; gaps are harmless.
        let seq = Counter::next(&self.counters, RECORD_SEQ_COUNTER).await?;
        let record = VoteRecord::new(voter_id, candidate_id, at, seq);
        // The unique index on `voter_id` turns a second insert into `Conflict`.
        self.votes.insert_one(&record, None).await?;
        Ok(record)
    }

    async fn find_by_voter(&self, voter_id: VoterId) -> Result<Option<VoteRecord>, StoreError> {
        Ok(self
            .votes
            .find_one(doc! { "voter_id": voter_id }, None)
            .await?)
    }

    async fn count_for(&self, candidate_id: CandidateId) -> Result<u64, StoreError> {
        Ok(self
            .votes
            .count_documents(doc! { "candidate_id": candidate_id }, None)
            .await?)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.votes.count_documents(None, None).await?)
    }

    async fn list(&self) -> Result<Vec<VoteRecord>, StoreError> {
        let records = self
            .votes
            .find(None, in_order("seq"))
            .await?
            .try_collect()
            .await?;
        Ok(records)
    }
}

#[rocket::async_trait]
impl AccountStore for MongoStore {
    async fn insert(&self, account: Account) -> Result<(), StoreError> {
        self.accounts.insert_one(&account, None).await?;
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .accounts
            .find_one(doc! { "email": email }, None)
            .await?)
    }
}

/// A fresh, uniquely named database on the server at `EVOTE_TEST_DB_URI`.
#[cfg(test)]
pub async fn test_database() -> Database {
    let uri = std::env::var("EVOTE_TEST_DB_URI").expect("EVOTE_TEST_DB_URI must be set");
    let client = Client::with_uri_str(uri).await.unwrap();
    let db = client.database(&format!("evote_test_{}", VoterId::new()));
    ensure_indexes_exist(&db).await.unwrap();
    db
}
