use rocket::{
    http::{CookieJar, Status},
    serde::json::Json,
    Route, State,
};

use crate::{
    error::{Error, Result},
    identity::{normalise_email, AuthError, Identity},
    model::{
        api::auth::{
            session_cookie, Anyone, AuthToken, Credentials, Registration, SessionDescription,
            AUTH_TOKEN_COOKIE,
        },
        db::{Role, VoterProfile},
    },
    store::{StoreError, Stores},
    verification::Verification,
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![register, login, session, logout]
}

#[post("/auth/register", data = "<registration>", format = "json")]
pub async fn register(
    registration: Json<Registration>,
    cookies: &CookieJar<'_>,
    identity: &State<Identity>,
    stores: &State<Stores>,
    config: &State<Config>,
) -> Result<Json<SessionDescription>> {
    let Registration {
        full_name,
        credentials,
    } = registration.into_inner();
    let full_name = full_name.trim();
    if full_name.is_empty() {
        return Err(Error::bad_request("Full name is required"));
    }

    let voter_id = identity.register(&credentials).await?;
    let profile = VoterProfile {
        full_name: full_name.to_string(),
        email: normalise_email(&credentials.email)?,
        role: Role::Voter,
    };
    let voter = match stores.voters.create(voter_id, profile).await {
        Ok(voter) => voter,
        Err(e) => {
            error!("Account {voter_id} created without a voter record: {e}");
            return Err(e.into());
        }
    };
    info!("Registered voter {voter_id}");

    let session = identity.open_session(voter_id)?;
    cookies.add(session_cookie(session, config));
    Ok(Json((&voter).into()))
}

#[post("/auth/login", data = "<credentials>", format = "json")]
pub async fn login(
    credentials: Json<Credentials>,
    cookies: &CookieJar<'_>,
    identity: &State<Identity>,
    stores: &State<Stores>,
    config: &State<Config>,
) -> Result<Json<SessionDescription>> {
    let session = identity.authenticate(&credentials).await?;

    // An account without a voter record cannot do anything useful.
    let voter = stores
        .voters
        .get(session.voter_id)
        .await
        .map_err(|e| match e {
            StoreError::NotFound => Error::from(AuthError::InvalidCredentials),
            e => e.into(),
        })?;

    cookies.add(session_cookie(session, config));
    Ok(Json((&voter).into()))
}

#[get("/auth/session")]
pub fn session(token: AuthToken<Anyone>) -> Json<SessionDescription> {
    Json((&token.voter).into())
}

/// Sign out, discarding any verification progress along with the session.
#[delete("/auth")]
pub fn logout(cookies: &CookieJar<'_>) -> Status {
    cookies.remove(AUTH_TOKEN_COOKIE);
    Verification::clear(cookies);
    Status::Ok
}
