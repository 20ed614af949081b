//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Datetimes are serialised as RFC 3339 strings.
//! - Internal ordering fields are left out.

pub mod auth;
pub mod candidate;
pub mod receipt;
pub mod stats;
pub mod voter;
