use serde::{Deserialize, Serialize};

use crate::model::db::{Role, Voter, VoterId};

/// Who is signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub id: VoterId,
    pub full_name: String,
    pub email: String,
    pub role: Role,
}

impl From<&Voter> for SessionDescription {
    fn from(voter: &Voter) -> Self {
        Self {
            id: voter.id,
            full_name: voter.full_name.clone(),
            email: voter.email.clone(),
            role: voter.role,
        }
    }
}
