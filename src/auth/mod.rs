//! Authentication module for the session server
//!
//! This module issues and verifies the access/renewal token pair,
//! coordinates the session lifecycle, and exposes it over HTTP.

pub mod captcha;
pub mod cookies;
pub mod handlers;
pub mod password;
mod service;
pub mod tokens;

pub use captcha::{CaptchaVerifier, HCaptchaVerifier};
pub use cookies::{CookiePolicy, SessionCookies, ACCESS_COOKIE, RENEWAL_COOKIE};
pub use password::{Argon2Hasher, PasswordHasher};
pub use service::{AuthService, Authenticated, IssuedSession, SessionPolicy};
pub use tokens::{AccessClaims, IssuedAccess, IssuedRenewal, RenewalClaims, TokenIssuer};
