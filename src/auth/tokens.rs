//! Signed access and renewal tokens.
//!
//! Both kinds are HS256 JWTs under one shared secret. The `aud` claim keeps
//! them apart so neither can stand in for the other.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{Group, User, UserId};
use crate::error::{AppError, AuthError};

const ACCESS_AUDIENCE: &str = "access";
const RENEWAL_AUDIENCE: &str = "renewal";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: UserId,
    pub username: String,
    pub external_id: Uuid,
    pub groups: Vec<Group>,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
    aud: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewalClaims {
    pub user_id: UserId,
    #[serde(rename = "jti")]
    pub token_id: String,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
    aud: String,
}

#[derive(Debug, Clone)]
pub struct IssuedAccess {
    pub token: String,
    pub claims: AccessClaims,
}

#[derive(Debug, Clone)]
pub struct IssuedRenewal {
    pub token: String,
    pub token_id: String,
    pub claims: RenewalClaims,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    renewal_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, access_ttl: Duration, renewal_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            renewal_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn renewal_ttl(&self) -> Duration {
        self.renewal_ttl
    }

    pub fn issue_access(&self, user: &User, groups: Vec<Group>) -> Result<IssuedAccess, AppError> {
        let claims = self.access_claims(user, groups, Utc::now());
        let token = self.sign(&claims)?;
        Ok(IssuedAccess { token, claims })
    }

    pub fn issue_renewal(&self, user_id: UserId) -> Result<IssuedRenewal, AppError> {
        let claims = self.renewal_claims(user_id, Utc::now());
        let token = self.sign(&claims)?;
        Ok(IssuedRenewal {
            token,
            token_id: claims.token_id.clone(),
            claims,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.verify(token, ACCESS_AUDIENCE, true)
    }

    pub fn verify_renewal(&self, token: &str) -> Result<RenewalClaims, AuthError> {
        self.verify(token, RENEWAL_AUDIENCE, true)
    }

    /// Check the signature of a renewal token without rejecting it for being
    /// expired. Only for tearing down a session, never for granting one.
    pub fn peek_renewal(&self, token: &str) -> Result<RenewalClaims, AuthError> {
        self.verify(token, RENEWAL_AUDIENCE, false)
    }

    fn access_claims(&self, user: &User, groups: Vec<Group>, now: DateTime<Utc>) -> AccessClaims {
        AccessClaims {
            user_id: user.id,
            username: user.username.clone(),
            external_id: user.external_id,
            groups,
            issued_at: now.timestamp(),
            expires_at: (now + self.access_ttl).timestamp(),
            aud: ACCESS_AUDIENCE.to_string(),
        }
    }

    fn renewal_claims(&self, user_id: UserId, now: DateTime<Utc>) -> RenewalClaims {
        RenewalClaims {
            user_id,
            token_id: Uuid::new_v4().simple().to_string(),
            issued_at: now.timestamp(),
            expires_at: (now + self.renewal_ttl).timestamp(),
            aud: RENEWAL_AUDIENCE.to_string(),
        }
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AppError::InternalError(format!("Failed to sign token: {}", e)))
    }

    fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        audience: &str,
        check_expiry: bool,
    ) -> Result<T, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = check_expiry;
        validation.set_audience(&[audience]);

        let data = decode::<T>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}
