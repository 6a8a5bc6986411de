use chrono::{Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

use super::{validate_code, validate_email, AuthError, AuthUser, Session};
use crate::util::validate_base_url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    user: AuthUser,
}

fn default_expires_in() -> i64 {
    3600
}

/// Client for the hosted backend's one-time-code auth endpoints.
#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: Url,
    anon_key: SecretString,
    timeout: Duration,
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("base_url", &self.base_url.as_str())
            .field("anon_key", &"[REDACTED]")
            .finish()
    }
}

impl AuthClient {
    /// `project_url` is the backend project root; auth lives under `auth/v1/`.
    pub fn new(
        http: reqwest::Client,
        project_url: &str,
        anon_key: SecretString,
    ) -> Result<Self, AuthError> {
        let base_url = validate_base_url(project_url)
            .and_then(|u| Ok(u.join("auth/v1/")?))
            .map_err(|e| AuthError::InvalidBaseUrl(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            anon_key,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask the service to email a one-time code, creating the account on
    /// first use. The address is validated before any request is made.
    pub async fn request_code(&self, email: &str) -> Result<(), AuthError> {
        let email = validate_email(email)?;
        let request = self
            .post("otp")?
            .json(&json!({ "email": email, "create_user": true }));
        self.send(request).await?;
        tracing::info!("Sign-in code requested");
        Ok(())
    }

    /// Exchange an emailed code for a session.
    pub async fn verify_code(&self, email: &str, code: &str) -> Result<Session, AuthError> {
        let email = validate_email(email)?;
        let code = validate_code(code)?;
        let request = self
            .post("verify")?
            .json(&json!({ "type": "email", "email": email, "token": code }));
        let body = self.send(request).await?;

        let verified: VerifyResponse =
            serde_json::from_slice(&body).map_err(|e| AuthError::Decode(e.to_string()))?;
        tracing::info!(user_id = %verified.user.id, "Signed in");

        Ok(Session {
            access_token: SecretString::from(verified.access_token),
            refresh_token: SecretString::from(verified.refresh_token),
            expires_at: Utc::now() + ChronoDuration::seconds(verified.expires_in.max(0)),
            user: verified.user,
        })
    }

    /// Revoke the session server-side. An already-invalid token counts as
    /// signed out.
    pub async fn sign_out(&self, access_token: &SecretString) -> Result<(), AuthError> {
        let request = self
            .post("logout")?
            .bearer_auth(access_token.expose_secret());
        match self.send(request).await {
            Ok(_) => Ok(()),
            Err(AuthError::Rejected { status: 401 | 403, .. }) => {
                tracing::debug!("Session already invalid at sign-out");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// The user that owns `access_token`.
    pub async fn current_user(&self, access_token: &SecretString) -> Result<AuthUser, AuthError> {
        let url = self.endpoint("user")?;
        let request = self
            .http
            .get(url)
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(access_token.expose_secret());
        let body = self.send(request).await?;
        serde_json::from_slice(&body).map_err(|e| AuthError::Decode(e.to_string()))
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        self.base_url
            .join(path)
            .map_err(|e| AuthError::InvalidBaseUrl(e.to_string()))
    }

    fn post(&self, path: &str) -> Result<reqwest::RequestBuilder, AuthError> {
        let url = self.endpoint(path)?;
        Ok(self
            .http
            .post(url)
            .header("apikey", self.anon_key.expose_secret()))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, AuthError> {
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| AuthError::Timeout(self.timeout.as_secs()))??;

        let status = response.status();
        let body = tokio::time::timeout(self.timeout, response.bytes())
            .await
            .map_err(|_| AuthError::Timeout(self.timeout.as_secs()))??;

        if !status.is_success() {
            let message = error_message(&body);
            tracing::warn!(status = status.as_u16(), message = %message, "Auth request rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(body.to_vec())
    }
}

/// Pull a human-readable message out of an auth error body.
fn error_message(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        msg: Option<String>,
        message: Option<String>,
        error_description: Option<String>,
        error: Option<String>,
    }
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.msg.or(b.message).or(b.error_description).or(b.error))
        .unwrap_or_else(|| String::from_utf8_lossy(body).chars().take(200).collect())
}
