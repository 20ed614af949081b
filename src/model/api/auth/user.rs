use crate::model::db::{Role, Voter};

/// A kind of user a route can require, defined by the roles that qualify.
pub trait User {
    /// Does a registered user with this role count as this kind of user?
    fn permits(role: Role) -> bool;
}

impl User for Voter {
    fn permits(role: Role) -> bool {
        role == Role::Voter
    }
}

/// Marker for routes restricted to admins.
pub struct Admin;

impl User for Admin {
    fn permits(role: Role) -> bool {
        role == Role::Admin
    }
}

/// Marker for routes open to any signed-in user.
pub struct Anyone;

impl User for Anyone {
    fn permits(_: Role) -> bool {
        true
    }
}
