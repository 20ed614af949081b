mod account;
mod candidate;
mod vote_record;
mod voter;

pub use account::Account;
pub use candidate::{Candidate, CandidateSpec};
pub use vote_record::VoteRecord;
pub use voter::{Role, Voter, VoterProfile};

use crate::model::mongodb::Id;

pub type VoterId = Id;
pub type CandidateId = Id;
pub type RecordId = Id;
