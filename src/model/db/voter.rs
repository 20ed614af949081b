use std::fmt::{Display, Formatter};
use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::Bson;
use serde::{Deserialize, Serialize};

use crate::model::db::VoterId;

/// What a registered user is allowed to do. Only [`Role::Voter`] may cast a vote.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Voter,
    Admin,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Voter => write!(f, "voter"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl From<Role> for Bson {
    fn from(role: Role) -> Self {
        Bson::String(role.to_string())
    }
}

/// The user-supplied part of a voter record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterProfile {
    pub full_name: String,
    /// Case-folded; unique across the registry.
    pub email: String,
    pub role: Role,
}

/// A registered user, as stored in the database.
///
/// `has_voted` and `voted_at` flip exactly once, through
/// [`VoterRegistry::mark_voted`](crate::store::VoterRegistry::mark_voted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: VoterId,
    #[serde(flatten)]
    pub profile: VoterProfile,
    pub has_voted: bool,
    pub voted_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    /// Registration order.
    pub seq: u64,
}

impl Voter {
    /// A voter who has not voted yet, registered now.
    pub fn new(id: VoterId, profile: VoterProfile, seq: u64) -> Self {
        Self {
            id,
            profile,
            has_voted: false,
            voted_at: None,
            registered_at: Utc::now(),
            seq,
        }
    }
}

impl Deref for Voter {
    type Target = VoterProfile;

    fn deref(&self) -> &Self::Target {
        &self.profile
    }
}
