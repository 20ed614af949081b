use mongodb::{
    bson::doc,
    error::Error as DbError,
    options::{FindOneAndUpdateOptions, ReturnDocument},
};
use serde::{Deserialize, Serialize};

use super::Coll;

/// Counter used to number voters in registration order.
pub const VOTER_SEQ_COUNTER: &str = "voter_seq";

/// Counter used to number candidates in insertion order.
pub const CANDIDATE_SEQ_COUNTER: &str = "candidate_seq";

/// Counter used to number ledger records in append order.
pub const RECORD_SEQ_COUNTER: &str = "record_seq";

/// A counter object used to implement auto-increment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "_id")]
    pub name: String,
    pub next: u64,
}

impl Counter {
    /// Atomically retrieve the next value of the named counter, starting at 1.
    /// The counter document is created on first use.
    pub async fn next(counters: &Coll<Counter>, name: &str) -> Result<u64, DbError> {
        let filter = doc! {
            "_id": name,
        };
        let update = doc! {
            "$inc": { "next": 1 }
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let counter = counters
            .find_one_and_update(filter, update, options)
            .await?
            // An upsert returning the new document always yields one.
            .map_or(1, |counter| counter.next);
        Ok(counter)
    }
}
