use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::error::AppError;

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// `Ok(())` only when the provider confirms the response token.
    async fn verify(&self, response: &str) -> Result<(), AppError>;
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

pub struct HCaptchaVerifier {
    client: reqwest::Client,
    secret: String,
    verify_url: url::Url,
}

impl HCaptchaVerifier {
    pub fn new(secret: String, verify_url: &str) -> Result<Self, AppError> {
        let verify_url = url::Url::parse(verify_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid captcha verify url: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::InternalError(e.to_string()))?;

        Ok(Self { client, secret, verify_url })
    }
}

#[async_trait]
impl CaptchaVerifier for HCaptchaVerifier {
    async fn verify(&self, response: &str) -> Result<(), AppError> {
        if response.is_empty() {
            return Err(AppError::ValidationError("Captcha response missing".into()));
        }

        let res = self
            .client
            .post(self.verify_url.clone())
            .form(&[("secret", self.secret.as_str()), ("response", response)])
            .send()
            .await
            .map_err(|e| AppError::ExternalError(format!("Captcha request failed: {}", e)))?;

        let verdict: SiteVerifyResponse = res
            .json()
            .await
            .map_err(|e| AppError::ExternalError(format!("Invalid captcha response: {}", e)))?;

        if verdict.success {
            Ok(())
        } else {
            warn!("Captcha rejected: {:?}", verdict.error_codes);
            Err(AppError::ValidationError("Captcha validation unsuccessful".into()))
        }
    }
}
