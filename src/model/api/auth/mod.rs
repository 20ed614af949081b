mod request;
mod session;
mod token;
mod user;

pub use request::{Credentials, Registration};
pub use session::SessionDescription;
pub use token::{session_cookie, AuthToken, AUTH_TOKEN_COOKIE};
pub use user::{Admin, Anyone, User};
