use std::marker::PhantomData;
use std::ops::Deref;

use rocket::{
    http::{Cookie, SameSite, Status},
    request::{FromRequest, Outcome},
    time::Duration,
    Request,
};

use crate::error::Error;
use crate::identity::{Identity, Session};
use crate::model::db::{Voter, VoterId};
use crate::store::{StoreError, Stores};
use crate::Config;

use super::user::User;

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// Serialize a session into an http-only cookie.
pub fn session_cookie(session: Session, config: &Config) -> Cookie<'static> {
    Cookie::build((AUTH_TOKEN_COOKIE, session.token))
        .max_age(Duration::seconds(config.auth_ttl().num_seconds()))
        .http_only(true)
        .same_site(SameSite::Strict)
        .build()
}

/// A signed-in user whose role qualifies them as a `U`.
///
/// The role is always read from the voter registry, never from the token.
pub struct AuthToken<U> {
    pub voter: Voter,
    phantom: PhantomData<U>,
}

impl<U> AuthToken<U> {
    pub fn id(&self) -> VoterId {
        self.voter.id
    }
}

impl<U> Deref for AuthToken<U> {
    type Target = Voter;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

#[rocket::async_trait]
impl<'r, U> FromRequest<'r> for AuthToken<U>
where
    U: User + Send,
{
    type Error = Error;

    /// Forwards with `401 Unauthorized` without a valid session, or
    /// `403 Forbidden` if the user's role doesn't qualify.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let (Some(identity), Some(stores)) = (
            req.rocket().state::<Identity>(),
            req.rocket().state::<Stores>(),
        ) else {
            let err = Error::internal("authentication state is not managed");
            return Outcome::Error((Status::InternalServerError, err));
        };

        let Some(cookie) = req.cookies().get(AUTH_TOKEN_COOKIE) else {
            return Outcome::Forward(Status::Unauthorized);
        };
        let Some(voter_id) = identity.current_session(cookie.value()) else {
            return Outcome::Forward(Status::Unauthorized);
        };

        // Check the user actually exists.
        let voter = match stores.voters.get(voter_id).await {
            Ok(voter) => voter,
            Err(StoreError::NotFound) => return Outcome::Forward(Status::Unauthorized),
            Err(e) => return Outcome::Error((Status::InternalServerError, e.into())),
        };

        // Check it represents the correct rights.
        if !U::permits(voter.role) {
            return Outcome::Forward(Status::Forbidden);
        }

        Outcome::Success(Self {
            voter,
            phantom: PhantomData,
        })
    }
}
