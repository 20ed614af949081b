use std::fmt::Display;

use rocket::{
    http::Status,
    response::{self, Responder},
    Request, Response,
};
use thiserror::Error;

use crate::coordinator::VoteError;
use crate::identity::AuthError;
use crate::store::StoreError;
use crate::verification::GateError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{1}")]
    Status(Status, String),
    #[error(transparent)]
    Vote(#[from] VoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Gate(#[from] GateError),
}

impl Error {
    pub fn not_found(what: impl Display) -> Self {
        Self::Status(Status::NotFound, format!("{what} not found"))
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::Status(Status::BadRequest, msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Status(Status::InternalServerError, msg.into())
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::Status(status, _) => *status,
            Self::Vote(err) => match err {
                VoteError::VoterNotFound | VoteError::CandidateNotFound => Status::NotFound,
                VoteError::RoleNotEligible(_) | VoteError::NotVerified(_) => Status::Forbidden,
                VoteError::AlreadyVoted => Status::Conflict,
                VoteError::PartiallyFailed { .. } | VoteError::Store(_) => {
                    Status::InternalServerError
                }
            },
            Self::Store(err) => match err {
                StoreError::NotFound => Status::NotFound,
                StoreError::Conflict | StoreError::AlreadyVoted => Status::Conflict,
                _ => Status::InternalServerError,
            },
            Self::Auth(err) => match err {
                AuthError::EmailTaken => Status::Conflict,
                AuthError::InvalidCredentials => Status::Unauthorized,
                AuthError::WeakPassword | AuthError::InvalidEmail => Status::BadRequest,
                AuthError::Argon2(_) | AuthError::Jwt(_) | AuthError::Store(_) => {
                    Status::InternalServerError
                }
            },
            Self::Gate(err) => match err {
                GateError::Timeout(_) => Status::GatewayTimeout,
                GateError::Unavailable(_) | GateError::Http(_) => Status::BadGateway,
            },
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let msg = if status.code >= 500 {
            // Don't leak internals, but make sure they're in the log.
            error!("{self}");
            status.reason_lossy().to_string()
        } else {
            self.to_string()
        };
        Response::build_from(msg.respond_to(req)?)
            .status(status)
            .ok()
    }
}
