use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::db::{Account, Candidate, Voter, VoteRecord};

use super::counter::Counter;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for Voter {
    const NAME: &'static str = "voters";
}

impl MongoCollection for Account {
    const NAME: &'static str = "accounts";
}

impl MongoCollection for Candidate {
    const NAME: &'static str = "candidates";
}

impl MongoCollection for VoteRecord {
    const NAME: &'static str = "votes";
}

impl MongoCollection for Counter {
    const NAME: &'static str = "counters";
}

/// Ensure that all the required indexes exist on the given database.
///
/// The unique index on `votes.voter_id` is what makes a ledger append an
/// insert-if-absent, so it must exist before any vote is accepted.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    create_index::<Voter>(db, "email", true).await?;
    create_index::<Voter>(db, "seq", false).await?;
    create_index::<Account>(db, "email", true).await?;
    create_index::<Candidate>(db, "seq", true).await?;
    // One record per voter, and fast per-candidate counts.
    create_index::<VoteRecord>(db, "voter_id", true).await?;
    create_index::<VoteRecord>(db, "candidate_id", false).await?;
    create_index::<VoteRecord>(db, "seq", true).await?;

    Ok(())
}

/// Create an ascending single-field index on `T`'s collection.
async fn create_index<T: MongoCollection + Send + Sync>(
    db: &Database,
    field: &str,
    unique: bool,
) -> Result<(), DbError> {
    let index = IndexModel::builder()
        .keys(doc! { field: 1 })
        .options(IndexOptions::builder().unique(unique).build())
        .build();
    Coll::<T>::from_db(db).create_index(index, None).await?;
    Ok(())
}
