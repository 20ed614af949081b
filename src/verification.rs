//! The Verification Gate: an opaque check that a voter is who they claim to
//! be, by face and by biometric. Successful checks accumulate into a
//! [`Verification`] proof held in an encrypted private cookie.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rocket::{
    http::{Cookie, CookieJar, SameSite, Status},
    outcome::IntoOutcome,
    request::{FromParam, FromRequest, Outcome},
    serde::json::serde_json,
    Request,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::db::VoterId;

pub const VERIFICATION_COOKIE: &str = "verification";

/// A way of verifying a voter's identity.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Face,
    Biometric,
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Face => write!(f, "face"),
            Self::Biometric => write!(f, "biometric"),
        }
    }
}

impl<'a> FromParam<'a> for Method {
    type Error = &'a str;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        match param {
            "face" => Ok(Self::Face),
            "biometric" => Ok(Self::Biometric),
            _ => Err(param),
        }
    }
}

/// The answer from a gate that managed to reach a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Verified,
    Failed,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Verification timed out after {0:?}")]
    Timeout(Duration),
    #[error("Verification service unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[rocket::async_trait]
pub trait VerificationGate: Send + Sync {
    async fn verify(&self, voter_id: VoterId, method: Method) -> Result<GateOutcome, GateError>;
}

/// Ask the gate, giving up after `timeout`. No proof is granted on expiry.
pub async fn verify_with_timeout(
    gate: &dyn VerificationGate,
    voter_id: VoterId,
    method: Method,
    timeout: Duration,
) -> Result<GateOutcome, GateError> {
    rocket::tokio::time::timeout(timeout, gate.verify(voter_id, method))
        .await
        .map_err(|_| GateError::Timeout(timeout))?
}

/// Gate backed by an external verification service.
///
/// Each check is a `POST <base_url>/<method>` with body
/// `{"voter_id": ..., "method": ...}`, answered by `{"verified": bool}`.
pub struct HttpGate {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct GateRequest {
    voter_id: VoterId,
    method: Method,
}

#[derive(Deserialize)]
struct GateResponse {
    verified: bool,
}

impl HttpGate {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, method: Method) -> String {
        format!("{}/{method}", self.base_url.trim_end_matches('/'))
    }
}

#[rocket::async_trait]
impl VerificationGate for HttpGate {
    async fn verify(&self, voter_id: VoterId, method: Method) -> Result<GateOutcome, GateError> {
        let response = self
            .client
            .post(self.url_for(method))
            .json(&GateRequest { voter_id, method })
            .send()
            .await?;
        if response.status().is_server_error() {
            return Err(GateError::Unavailable(response.status().to_string()));
        }
        let body: GateResponse = response.error_for_status()?.json().await?;
        Ok(if body.verified {
            GateOutcome::Verified
        } else {
            GateOutcome::Failed
        })
    }
}

/// Verifies everyone. Only for development without a verification service.
pub struct AcceptingGate;

#[rocket::async_trait]
impl VerificationGate for AcceptingGate {
    async fn verify(&self, voter_id: VoterId, method: Method) -> Result<GateOutcome, GateError> {
        debug!("Accepting unchecked {method} verification for voter {voter_id}");
        Ok(GateOutcome::Verified)
    }
}

/// The configured gate and its per-call timeout, managed as Rocket state.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<dyn VerificationGate>,
    timeout: Duration,
}

impl Gate {
    pub fn new(inner: Arc<dyn VerificationGate>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub async fn verify(&self, voter_id: VoterId, method: Method) -> Result<GateOutcome, GateError> {
        verify_with_timeout(self.inner.as_ref(), voter_id, method, self.timeout).await
    }
}

/// Proof that a voter passed some verification methods, valid until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub voter_id: VoterId,
    pub methods: BTreeSet<Method>,
    pub expires_at: DateTime<Utc>,
}

impl Verification {
    /// An empty proof for the given voter.
    pub fn new(voter_id: VoterId, ttl: chrono::Duration) -> Self {
        Self {
            voter_id,
            methods: BTreeSet::new(),
            expires_at: Utc::now() + ttl,
        }
    }

    /// Continue an existing proof if it still belongs to this voter and has
    /// not expired, otherwise start again.
    pub fn resume(existing: Option<Self>, voter_id: VoterId, ttl: chrono::Duration) -> Self {
        match existing {
            Some(proof) if proof.voter_id == voter_id && !proof.is_expired() => proof,
            _ => Self::new(voter_id, ttl),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Check that this proof may be used by `voter_id` to cast a vote.
    pub fn check(&self, voter_id: VoterId, required: &BTreeSet<Method>) -> Result<(), String> {
        if self.voter_id != voter_id {
            return Err("verification belongs to a different voter".to_string());
        }
        if self.is_expired() {
            return Err("verification has expired".to_string());
        }
        let missing: Vec<_> = required
            .difference(&self.methods)
            .map(Method::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing verification: {}", missing.join(", ")));
        }
        Ok(())
    }

    /// Store this proof in an encrypted cookie.
    pub fn store(&self, cookies: &CookieJar<'_>) {
        // Serializing plain data with string keys cannot fail.
        if let Ok(value) = serde_json::to_string(self) {
            let cookie = Cookie::build((VERIFICATION_COOKIE, value))
                .http_only(true)
                .same_site(SameSite::Strict);
            cookies.add_private(cookie);
        }
    }

    pub fn clear(cookies: &CookieJar<'_>) {
        cookies.remove_private(VERIFICATION_COOKIE);
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Verification {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        req.cookies()
            .get_private(VERIFICATION_COOKIE)
            .and_then(|cookie| serde_json::from_str(cookie.value()).ok())
            .or_forward(Status::Forbidden)
    }
}

#[cfg(test)]
pub use scripted::{Script, ScriptedGate};
