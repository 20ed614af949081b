use serde::{Deserialize, Serialize};

/// An email and password pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// A request to register as a voter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub full_name: String,
    #[serde(flatten)]
    pub credentials: Credentials,
}
