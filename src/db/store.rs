//! Storage capabilities used by the session layer.

use async_trait::async_trait;
use chrono::Duration;

use crate::db::models::{Group, NewUser, User, UserId};
use crate::Result;

pub const MAX_ROTATIONS: i16 = 2;

/// Identity data: users, their password digests and group memberships.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_user_by_id(&self, id: UserId) -> Result<Option<User>>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Insert the user and its default group membership in one transaction.
    async fn create_user(&self, user: &NewUser, default_group_id: i64) -> Result<User>;

    async fn update_password(&self, id: UserId, password_digest: &str) -> Result<()>;

    async fn get_user_groups(&self, id: UserId) -> Result<Vec<Group>>;
}

/// Server-side record of issued renewal tokens. The registry, not the token
/// signature, decides whether a renewal token is still live.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RenewalRegistry: Send + Sync {
    async fn save(&self, user_id: UserId, token_id: &str, ttl: Duration) -> Result<()>;

    /// `DatabaseError::NotFound` unless a record for this user and token
    /// exists with `expires_at >= now`.
    async fn validate(&self, user_id: UserId, token_id: &str) -> Result<()>;

    /// Shorten the record's lifetime to at most `now + grace`.
    async fn invalidate(&self, token_id: &str, grace: Duration) -> Result<()>;

    /// Claim one rotation of a live record and shorten it to at most
    /// `now + grace`. A record can be rotated `MAX_ROTATIONS` times: once by
    /// its holder and once more by a racing duplicate. Returns whether the
    /// claim succeeded.
    async fn claim_rotation(&self, user_id: UserId, token_id: &str, grace: Duration) -> Result<bool>;

    /// Delete the live record if present. Returns whether a row was removed,
    /// so only the first of two racing callers sees `true`.
    async fn consume(&self, user_id: UserId, token_id: &str) -> Result<bool>;

    async fn delete(&self, token_id: &str) -> Result<()>;

    async fn delete_all_for_user(&self, user_id: UserId) -> Result<u64>;

    async fn delete_expired(&self) -> Result<u64>;
}
