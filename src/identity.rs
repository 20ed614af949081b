//! Password accounts and signed session tokens.
//!
//! The identity provider only knows *who* someone is. What they may do is
//! decided by their voter record's role.

use std::ops::Deref;
use std::sync::Arc;

use chrono::{serde::ts_seconds, DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    api::auth::Credentials,
    db::{Account, Role, VoterId, VoterProfile},
};
use crate::store::{AccountStore, StoreError, VoterRegistry};
use crate::Config;

pub const MIN_PASSWORD_LENGTH: usize = 8;

const SALT_LENGTH: usize = 16;

const ADMIN_NAME: &str = "Administrator";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Email address is already registered")]
    EmailTaken,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Password must be at least {MIN_PASSWORD_LENGTH} characters")]
    WeakPassword,
    #[error("Invalid email address")]
    InvalidEmail,
    #[error(transparent)]
    Argon2(#[from] argon2::Error),
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A signed-in user and the token that proves it.
#[derive(Debug, Clone)]
pub struct Session {
    pub voter_id: VoterId,
    pub token: String,
}

#[rocket::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account, returning the ID its voter record must use.
    async fn register(&self, credentials: &Credentials) -> Result<VoterId, AuthError>;

    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError>;

    /// The account registered under `email`, if any.
    async fn find(&self, email: &str) -> Result<Option<VoterId>, AuthError>;

    /// Issue a fresh session token for an already identified user.
    fn open_session(&self, voter_id: VoterId) -> Result<Session, AuthError>;

    /// Who `token` belongs to, if it is genuine and unexpired.
    fn current_session(&self, token: &str) -> Option<VoterId>;
}

/// Trim and lowercase an email address, rejecting anything that clearly
/// isn't one.
pub fn normalise_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.contains(char::is_whitespace) =>
        {
            Ok(email)
        }
        _ => Err(AuthError::InvalidEmail),
    }
}

/// JWT claims: the user ID plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims {
    sub: VoterId,
    #[serde(with = "ts_seconds")]
    exp: DateTime<Utc>,
}

/// Argon2 password hashes, HS256 session tokens.
pub struct PasswordIdentityProvider {
    accounts: Arc<dyn AccountStore>,
    jwt_secret: Vec<u8>,
    session_ttl: Duration,
}

impl PasswordIdentityProvider {
    pub fn new(accounts: Arc<dyn AccountStore>, config: &Config) -> Self {
        Self {
            accounts,
            jwt_secret: config.jwt_secret().to_vec(),
            session_ttl: config.auth_ttl(),
        }
    }
}

#[rocket::async_trait]
impl IdentityProvider for PasswordIdentityProvider {
    async fn register(&self, credentials: &Credentials) -> Result<VoterId, AuthError> {
        let email = normalise_email(&credentials.email)?;
        if credentials.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::WeakPassword);
        }

        let salt: [u8; SALT_LENGTH] = rand::random();
        let password_hash = argon2::hash_encoded(
            credentials.password.as_bytes(),
            &salt,
            &argon2::Config::default(),
        )?;
        let account = Account {
            id: VoterId::new(),
            email,
            password_hash,
        };
        let id = account.id;
        match self.accounts.insert(account).await {
            Ok(()) => Ok(id),
            Err(StoreError::Conflict) => Err(AuthError::EmailTaken),
            Err(e) => Err(e.into()),
        }
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let email =
            normalise_email(&credentials.email).map_err(|_| AuthError::InvalidCredentials)?;
        let account = self
            .accounts
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !argon2::verify_encoded(&account.password_hash, credentials.password.as_bytes())? {
            return Err(AuthError::InvalidCredentials);
        }
        self.open_session(account.id)
    }

    async fn find(&self, email: &str) -> Result<Option<VoterId>, AuthError> {
        let email = normalise_email(email)?;
        Ok(self
            .accounts
            .find_by_email(&email)
            .await?
            .map(|account| account.id))
    }

    fn open_session(&self, voter_id: VoterId) -> Result<Session, AuthError> {
        let claims = Claims {
            sub: voter_id,
            exp: Utc::now() + self.session_ttl,
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.jwt_secret),
        )?;
        Ok(Session { voter_id, token })
    }

    fn current_session(&self, token: &str) -> Option<VoterId> {
        jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.jwt_secret),
            &Validation::default(),
        )
        .ok()
        .map(|data| data.claims.sub)
    }
}

/// The configured identity provider, managed as Rocket state.
#[derive(Clone)]
pub struct Identity(Arc<dyn IdentityProvider>);

impl Identity {
    pub fn new(provider: impl IdentityProvider + 'static) -> Self {
        Self(Arc::new(provider))
    }
}

impl Deref for Identity {
    type Target = dyn IdentityProvider;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// Ensure the admin named in the config has both an account and an admin
/// voter record, creating whichever is missing.
///
/// This operation is idempotent.
pub async fn ensure_admin_exists(
    identity: &Identity,
    voters: &dyn VoterRegistry,
    config: &Config,
) -> Result<VoterId, AuthError> {
    let credentials = Credentials {
        email: config.admin_email().to_string(),
        password: config.admin_password().to_string(),
    };
    let email = normalise_email(&credentials.email)?;

    let id = match identity.register(&credentials).await {
        Ok(id) => {
            info!("Created admin account {email}");
            id
        }
        Err(AuthError::EmailTaken) => identity
            .find(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?,
        Err(e) => return Err(e),
    };

    match voters.get(id).await {
        Ok(voter) if voter.role == Role::Admin => Ok(id),
        Ok(_) => {
            // Never promote an existing voter.
            error!("Account {email} exists but is not an admin");
            Err(AuthError::EmailTaken)
        }
        Err(StoreError::NotFound) => {
            let profile = VoterProfile {
                full_name: ADMIN_NAME.to_string(),
                email,
                role: Role::Admin,
            };
            voters.create(id, profile).await?;
            Ok(id)
        }
        Err(e) => Err(e.into()),
    }
}
