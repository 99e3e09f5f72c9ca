pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod reclamation;

use actix_web::HttpResponse;
use std::sync::Arc;
use tracing::info;

pub use config::Settings;
pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;

use auth::{
    Argon2Hasher, AuthService, CaptchaVerifier, CookiePolicy, HCaptchaVerifier, PasswordHasher, SessionPolicy,
    TokenIssuer,
};
use db::{DbOperations, RenewalRegistry};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub auth_service: Arc<AuthService>,
    pub registry: Arc<dyn RenewalRegistry>,
    pub cookies: CookiePolicy,
    pub captcha: Option<Arc<dyn CaptchaVerifier>>,
    db: Option<DbOperations>,
}

impl AppState {
    pub async fn new(config: Settings) -> Result<Self> {
        let db = DbOperations::new_with_options(
            &config.database.url,
            config.database.max_connections,
            std::time::Duration::from_secs(config.database.acquire_timeout_secs),
        )
        .await?;

        if config.database.run_migrations {
            db.run_migrations().await?;
            info!("Database migrations applied");
        }

        let captcha: Option<Arc<dyn CaptchaVerifier>> = match &config.captcha.hcaptcha_secret {
            Some(secret) if !secret.is_empty() => Some(Arc::new(HCaptchaVerifier::new(
                secret.clone(),
                &config.captcha.verify_url,
            )?)),
            _ => None,
        };

        let store = Arc::new(db.clone());
        let hasher = Arc::new(Argon2Hasher::new());
        let mut state = Self::with_services(config, store.clone(), store, hasher, captcha);
        state.db = Some(db);
        Ok(state)
    }

    /// Wire the state over arbitrary storage backends.
    pub fn with_services(
        config: Settings,
        store: Arc<dyn db::CredentialStore>,
        registry: Arc<dyn RenewalRegistry>,
        hasher: Arc<dyn PasswordHasher>,
        captcha: Option<Arc<dyn CaptchaVerifier>>,
    ) -> Self {
        let tokens = TokenIssuer::new(&config.auth.jwt_secret, config.access_ttl(), config.renewal_ttl());
        let auth_service = AuthService::new(
            store,
            registry.clone(),
            hasher,
            tokens,
            SessionPolicy::from_settings(&config),
        );

        Self {
            cookies: CookiePolicy {
                secure: config.server.secure_cookies,
            },
            config: Arc::new(config),
            auth_service: Arc::new(auth_service),
            registry,
            captcha,
            db: None,
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(db) = &self.db {
            db.pool().close().await;
        }
        Ok(())
    }
}
