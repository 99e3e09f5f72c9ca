#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tokenwarden::auth::{AuthService, PasswordHasher, SessionPolicy, TokenIssuer};
use tokenwarden::config::RotationPolicy;
use tokenwarden::db::{CredentialStore, Group, NewUser, RenewalRegistry, User, UserId, MAX_ROTATIONS};
use tokenwarden::error::DatabaseError;
use tokenwarden::{AppError, AppState, Settings};

pub const SECRET: &str = "integration_test_secret";

/// In-memory credential store with the default `user` group seeded.
#[derive(Default)]
pub struct MemoryCredentials {
    users: Mutex<Vec<User>>,
    memberships: Mutex<Vec<(UserId, i64)>>,
    next_id: AtomicI64,
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn get_user_by_id(&self, id: UserId) -> tokenwarden::Result<Option<User>> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> tokenwarden::Result<Option<User>> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.username == username).cloned())
    }

    async fn create_user(&self, user: &NewUser, default_group_id: i64) -> tokenwarden::Result<User> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.username == user.username) {
            return Err(DatabaseError::Duplicate.into());
        }

        let created = User {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            username: user.username.clone(),
            password_digest: user.password_digest.clone(),
            created_at: user.created_at,
            external_id: user.external_id,
        };
        users.push(created.clone());
        self.memberships.lock().unwrap().push((created.id, default_group_id));
        Ok(created)
    }

    async fn update_password(&self, id: UserId, password_digest: &str) -> tokenwarden::Result<()> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(AppError::DatabaseError(DatabaseError::NotFound))?;
        user.password_digest = password_digest.to_string();
        Ok(())
    }

    async fn get_user_groups(&self, id: UserId) -> tokenwarden::Result<Vec<Group>> {
        Ok(self
            .memberships
            .lock()
            .unwrap()
            .iter()
            .filter(|(user_id, _)| *user_id == id)
            .map(|(_, group_id)| Group {
                id: *group_id,
                name: if *group_id == 1 { "user".into() } else { format!("group-{}", group_id) },
            })
            .collect())
    }
}

/// One `user_renewals` row, keyed by the raw token id.
#[derive(Debug, Clone)]
pub struct RenewalRecord {
    pub user_id: UserId,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
    pub rotations: i16,
}

impl RenewalRecord {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// In-memory renewal registry. Every operation runs under one lock, so
/// `consume` and `claim_rotation` are atomic the way a single Postgres
/// statement is.
#[derive(Default)]
pub struct MemoryRegistry {
    records: Mutex<Vec<RenewalRecord>>,
}

impl MemoryRegistry {
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn live_for(&self, user_id: UserId) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id && !r.is_expired())
            .count()
    }

    /// Insert a record directly, bypassing the service.
    pub fn insert(&self, user_id: UserId, token_id: &str, expires_in: Duration) {
        self.records.lock().unwrap().push(RenewalRecord {
            user_id,
            token_id: token_id.to_string(),
            expires_at: Utc::now() + expires_in,
            rotations: 0,
        });
    }
}

#[async_trait]
impl RenewalRegistry for MemoryRegistry {
    async fn save(&self, user_id: UserId, token_id: &str, ttl: Duration) -> tokenwarden::Result<()> {
        self.insert(user_id, token_id, ttl);
        Ok(())
    }

    async fn validate(&self, user_id: UserId, token_id: &str) -> tokenwarden::Result<()> {
        let now = Utc::now();
        let found = self
            .records
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.user_id == user_id && r.token_id == token_id && r.expires_at >= now);
        if found {
            Ok(())
        } else {
            Err(DatabaseError::NotFound.into())
        }
    }

    async fn invalidate(&self, token_id: &str, grace: Duration) -> tokenwarden::Result<()> {
        let cap = Utc::now() + grace;
        for record in self.records.lock().unwrap().iter_mut() {
            if record.token_id == token_id && record.expires_at > cap {
                record.expires_at = cap;
            }
        }
        Ok(())
    }

    async fn claim_rotation(&self, user_id: UserId, token_id: &str, grace: Duration) -> tokenwarden::Result<bool> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.iter_mut().find(|r| {
            r.user_id == user_id && r.token_id == token_id && r.expires_at >= now && r.rotations < MAX_ROTATIONS
        }) else {
            return Ok(false);
        };

        record.rotations += 1;
        record.expires_at = record.expires_at.min(now + grace);
        Ok(true)
    }

    async fn consume(&self, user_id: UserId, token_id: &str) -> tokenwarden::Result<bool> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| !(r.user_id == user_id && r.token_id == token_id && r.expires_at >= now));
        Ok(records.len() < before)
    }

    async fn delete(&self, token_id: &str) -> tokenwarden::Result<()> {
        self.records.lock().unwrap().retain(|r| r.token_id != token_id);
        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: UserId) -> tokenwarden::Result<u64> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.user_id != user_id);
        Ok((before - records.len()) as u64)
    }

    async fn delete_expired(&self) -> tokenwarden::Result<u64> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| !r.is_expired());
        Ok((before - records.len()) as u64)
    }
}

/// Reversible "digest" so tests don't pay for argon2.
pub struct PlainHasher;

impl PasswordHasher for PlainHasher {
    fn hash(&self, password: &str) -> Result<String, AppError> {
        Ok(format!("plain${}", password))
    }

    fn verify(&self, digest: &str, password: &str) -> bool {
        digest.strip_prefix("plain$") == Some(password)
    }
}

pub struct Harness {
    pub service: AuthService,
    pub credentials: Arc<MemoryCredentials>,
    pub registry: Arc<MemoryRegistry>,
}

pub fn policy(rotation: RotationPolicy) -> SessionPolicy {
    SessionPolicy {
        rotation,
        ..SessionPolicy::default()
    }
}

pub fn harness(access_ttl: Duration, renewal_ttl: Duration, policy: SessionPolicy) -> Harness {
    let credentials = Arc::new(MemoryCredentials::default());
    let registry = Arc::new(MemoryRegistry::default());
    let service = AuthService::new(
        credentials.clone(),
        registry.clone(),
        Arc::new(PlainHasher),
        TokenIssuer::new(SECRET, access_ttl, renewal_ttl),
        policy,
    );

    Harness {
        service,
        credentials,
        registry,
    }
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::new_for_test().expect("Failed to load test config");
    settings.auth.jwt_secret = SECRET.to_string();
    settings
}

pub fn test_state(settings: Settings) -> (AppState, Arc<MemoryRegistry>) {
    let credentials = Arc::new(MemoryCredentials::default());
    let registry = Arc::new(MemoryRegistry::default());
    let state = AppState::with_services(settings, credentials, registry.clone(), Arc::new(PlainHasher), None);
    (state, registry)
}
