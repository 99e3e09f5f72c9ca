//! Database module for the session server
//!
//! This module holds the storage capabilities, their Postgres
//! implementation, and the row models they exchange.

pub mod models;
pub mod operations;
pub mod store;

pub use models::{Group, NewUser, User, UserId};
pub use operations::DbOperations;
pub use store::{CredentialStore, RenewalRegistry, MAX_ROTATIONS};
