mod collection;
mod counter;
mod errors;
mod id;

pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use counter::{Counter, CANDIDATE_SEQ_COUNTER, RECORD_SEQ_COUNTER, VOTER_SEQ_COUNTER};
pub use errors::is_duplicate_key_error;
pub use id::Id;
