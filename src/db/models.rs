use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub type UserId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_digest: String,
    pub created_at: DateTime<Utc>,
    pub external_id: Uuid,
}

/// A user row that has not been inserted yet.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_digest: String,
    pub created_at: DateTime<Utc>,
    pub external_id: Uuid,
}

impl NewUser {
    pub fn new(username: String, password_digest: String) -> Self {
        Self {
            username,
            password_digest,
            created_at: Utc::now(),
            external_id: Uuid::new_v4(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: i64,
    pub name: String,
}
