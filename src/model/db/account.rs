use serde::{Deserialize, Serialize};

use crate::model::db::VoterId;

/// Login credentials held by the identity provider. Shares its ID with the
/// voter record it was registered alongside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "_id")]
    pub id: VoterId,
    pub email: String,
    /// Argon2 encoded hash, salt included.
    pub password_hash: String,
}
