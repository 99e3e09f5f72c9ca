use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use crate::auth::password::PasswordHasher;
use crate::auth::tokens::{AccessClaims, IssuedAccess, IssuedRenewal, RenewalClaims, TokenIssuer};
use crate::config::{RotationPolicy, Settings};
use crate::db::models::{NewUser, User};
use crate::db::store::{CredentialStore, RenewalRegistry};
use crate::error::{AppError, AuthError, DatabaseError};
use crate::Result;

const MAX_USERNAME_LENGTH: usize = 64;

/// Session rules that are not part of token signing.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub rotation: RotationPolicy,
    pub grace_window: Duration,
    pub default_group_id: i64,
    pub min_password_length: usize,
    pub revoke_sessions_on_password_change: bool,
}

impl SessionPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            rotation: settings.auth.rotation_policy,
            grace_window: settings.grace_window(),
            default_group_id: settings.auth.default_group_id,
            min_password_length: settings.auth.min_password_length,
            revoke_sessions_on_password_change: settings.auth.revoke_sessions_on_password_change,
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            rotation: RotationPolicy::GraceWindow,
            grace_window: Duration::minutes(2),
            default_group_id: 1,
            min_password_length: 8,
            revoke_sessions_on_password_change: false,
        }
    }
}

/// A freshly minted access + renewal pair whose renewal record is persisted.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access: IssuedAccess,
    pub renewal: IssuedRenewal,
}

impl IssuedSession {
    pub fn claims(&self) -> &AccessClaims {
        &self.access.claims
    }

    pub fn access_max_age_secs(&self) -> i64 {
        self.access.claims.expires_at - self.access.claims.issued_at
    }

    pub fn renewal_max_age_secs(&self) -> i64 {
        self.renewal.claims.expires_at - self.renewal.claims.issued_at
    }
}

/// How a request was authenticated.
#[derive(Debug, Clone)]
pub enum Authenticated {
    ViaAccess(AccessClaims),
    /// The access token had lapsed; a new pair was minted from the renewal token.
    ViaRenewal(IssuedSession),
}

impl Authenticated {
    pub fn claims(&self) -> &AccessClaims {
        match self {
            Authenticated::ViaAccess(claims) => claims,
            Authenticated::ViaRenewal(session) => session.claims(),
        }
    }

    pub fn rotated(&self) -> Option<&IssuedSession> {
        match self {
            Authenticated::ViaAccess(_) => None,
            Authenticated::ViaRenewal(session) => Some(session),
        }
    }
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    registry: Arc<dyn RenewalRegistry>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: TokenIssuer,
    policy: SessionPolicy,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        registry: Arc<dyn RenewalRegistry>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: TokenIssuer,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            hasher,
            tokens,
            policy,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub async fn register(&self, username: &str, password: &str, confirm_password: &str) -> Result<User> {
        validate_username(username)?;
        if password != confirm_password {
            return Err(AppError::ValidationError("Passwords do not match".into()));
        }
        self.validate_password(password)?;

        if self.store.get_user_by_username(username).await?.is_some() {
            return Err(DatabaseError::Duplicate.into());
        }

        let digest = self.hasher.hash(password)?;
        let user = self
            .store
            .create_user(&NewUser::new(username.to_string(), digest), self.policy.default_group_id)
            .await?;

        info!("Registered user {} (id {})", user.username, user.id);
        Ok(user)
    }

    /// Verify credentials and open a new session. An unknown username and a
    /// wrong password fail identically.
    pub async fn login(&self, username: &str, password: &str) -> Result<IssuedSession> {
        let user = match self.store.get_user_by_username(username).await? {
            Some(user) if self.hasher.verify(&user.password_digest, password) => user,
            _ => {
                debug!("Rejected login for {}", username);
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        let session = self.open_session(&user).await?;
        info!("User {} logged in", user.username);
        Ok(session)
    }

    /// Resolve the request's tokens. An expired (or absent) access token is
    /// recovered through the renewal token; every other failure ends the
    /// session.
    pub async fn authenticate(&self, access: Option<&str>, renewal: Option<&str>) -> Result<Authenticated> {
        let access_error = match access {
            Some(token) => match self.tokens.verify_access(token) {
                Ok(claims) => return Ok(Authenticated::ViaAccess(claims)),
                Err(e) => e,
            },
            None => AuthError::MissingToken,
        };

        match (access_error, renewal) {
            (AuthError::TokenExpired, Some(renewal)) | (AuthError::MissingToken, Some(renewal)) => {
                self.refresh(renewal).await.map(Authenticated::ViaRenewal)
            }
            (e, _) => Err(e.into()),
        }
    }

    /// Trade a renewal token for a new pair, rotating the registry record.
    /// The user and groups are loaded before the registry is touched, so a
    /// store outage never burns the caller's renewal record.
    pub async fn refresh(&self, renewal: &str) -> Result<IssuedSession> {
        let claims = match self.tokens.verify_renewal(renewal) {
            Ok(claims) => claims,
            Err(e) => {
                self.teardown(Some(renewal)).await;
                return Err(e.into());
            }
        };

        let user = self
            .store
            .get_user_by_id(claims.user_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;
        let groups = self.store.get_user_groups(user.id).await?;

        if let Err(e) = self.claim_registry(&claims).await {
            if e.is_session_failure() {
                self.teardown(Some(renewal)).await;
            }
            return Err(e);
        }

        let access = self.tokens.issue_access(&user, groups)?;
        let next = self.tokens.issue_renewal(user.id)?;
        self.registry.save(user.id, &next.token_id, self.tokens.renewal_ttl()).await?;

        debug!("Rotated renewal token for user {}", user.id);
        Ok(IssuedSession { access, renewal: next })
    }

    /// End the current session only.
    pub async fn logout(&self, renewal: Option<&str>) -> Result<()> {
        if let Some(claims) = renewal.and_then(|t| self.tokens.peek_renewal(t).ok()) {
            self.registry.delete(&claims.token_id).await?;
            info!("User {} logged out", claims.user_id);
        }
        Ok(())
    }

    /// End every session of the user owning the renewal token. Only a live
    /// session may do this; a dead token just gets its cookies cleared.
    pub async fn logout_all(&self, renewal: Option<&str>) -> Result<()> {
        let Some(claims) = renewal.and_then(|t| self.tokens.verify_renewal(t).ok()) else {
            return Ok(());
        };

        match self.registry.validate(claims.user_id, &claims.token_id).await {
            Ok(()) => {}
            Err(AppError::DatabaseError(DatabaseError::NotFound)) => {
                debug!("Ignoring logout-all from a dead session of user {}", claims.user_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let removed = self.registry.delete_all_for_user(claims.user_id).await?;
        info!("User {} logged out of {} sessions", claims.user_id, removed);
        Ok(())
    }

    /// Replace the password after re-verifying the current one. Returns a new
    /// pair for the caller when other sessions were revoked along the way.
    pub async fn change_password(
        &self,
        claims: &AccessClaims,
        current_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<Option<IssuedSession>> {
        if new_password == current_password {
            return Err(AppError::ValidationError(
                "New password is the same as current password".into(),
            ));
        }
        if new_password != confirm_password {
            return Err(AppError::ValidationError("Passwords do not match".into()));
        }
        self.validate_password(new_password)?;

        let user = self
            .store
            .get_user_by_id(claims.user_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        if !self.hasher.verify(&user.password_digest, current_password) {
            return Err(AppError::ValidationError("Current password is incorrect".into()));
        }

        let digest = self.hasher.hash(new_password)?;
        self.store.update_password(user.id, &digest).await?;
        info!("Password changed for user {}", user.username);

        if !self.policy.revoke_sessions_on_password_change {
            return Ok(None);
        }

        let removed = self.registry.delete_all_for_user(user.id).await?;
        info!("Revoked {} sessions of user {} after password change", removed, user.username);
        self.open_session(&user).await.map(Some)
    }

    /// Best-effort invalidation of a session that failed verification.
    pub async fn teardown(&self, renewal: Option<&str>) {
        let Some(claims) = renewal.and_then(|t| self.tokens.peek_renewal(t).ok()) else {
            return;
        };
        if let Err(e) = self.registry.invalidate(&claims.token_id, self.policy.grace_window).await {
            warn!("Failed to tear down session of user {}: {}", claims.user_id, e);
        }
    }

    async fn open_session(&self, user: &User) -> Result<IssuedSession> {
        let groups = self.store.get_user_groups(user.id).await?;
        let access = self.tokens.issue_access(user, groups)?;
        let renewal = self.tokens.issue_renewal(user.id)?;
        self.registry.save(user.id, &renewal.token_id, self.tokens.renewal_ttl()).await?;

        Ok(IssuedSession { access, renewal })
    }

    /// Take the renewal record out of circulation according to the rotation
    /// policy. Fails with `SessionNotFound` when the record is gone, expired
    /// or out of rotations.
    async fn claim_registry(&self, claims: &RenewalClaims) -> Result<()> {
        let claimed = match self.policy.rotation {
            RotationPolicy::GraceWindow => {
                self.registry
                    .claim_rotation(claims.user_id, &claims.token_id, self.policy.grace_window)
                    .await?
            }
            RotationPolicy::SingleUse => self.registry.consume(claims.user_id, &claims.token_id).await?,
        };

        if claimed {
            Ok(())
        } else {
            Err(AuthError::SessionNotFound.into())
        }
    }

    fn validate_password(&self, password: &str) -> Result<()> {
        if password.chars().count() < self.policy.min_password_length {
            return Err(AppError::ValidationError(format!(
                "Password must be at least {} characters",
                self.policy.min_password_length
            )));
        }
        Ok(())
    }
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.len() > MAX_USERNAME_LENGTH {
        return Err(AppError::ValidationError(format!(
            "Username must be 1-{} characters",
            MAX_USERNAME_LENGTH
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(AppError::ValidationError(
            "Username can only contain letters, numbers, '_', '-' and '.'".into(),
        ));
    }
    Ok(())
}
