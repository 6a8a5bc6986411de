//! Passwordless email sign-in.
//!
//! The hosted backend mails a 6-digit one-time code; exchanging it returns a
//! [`Session`] whose access token authorizes data store requests. The token
//! is shared with the REST data store through a [`TokenSlot`].

mod client;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

pub use client::AuthClient;

/// Length of the one-time code sent by email.
pub const CODE_LENGTH: usize = 6;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Please enter a valid email address")]
    InvalidEmail,

    #[error("Code must be exactly {CODE_LENGTH} digits")]
    InvalidCode,

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Authentication failed (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed auth response: {0}")]
    Decode(String),

    #[error("Invalid backend URL: {0}")]
    InvalidBaseUrl(String),
}

// ============================================================================
// Session
// ============================================================================

/// Identity returned by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// A signed-in session.
#[derive(Clone)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Shared holder for the current access token.
///
/// Cloning shares the slot. Writers are the session store; readers are data
/// store requests that need `Authorization: Bearer`.
#[derive(Clone, Default)]
pub struct TokenSlot(Arc<RwLock<Option<SecretString>>>);

impl TokenSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: Option<SecretString>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn get(&self) -> Option<SecretString> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl std::fmt::Debug for TokenSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.get().is_some() { "[SET]" } else { "[EMPTY]" };
        f.debug_tuple("TokenSlot").field(&state).finish()
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Check that `email` looks like an address and return it trimmed.
///
/// Deliberately loose: one `@`, a non-empty local part, a dotted domain
/// and no whitespace. The auth service does the real check.
pub fn validate_email(email: &str) -> Result<&str, AuthError> {
    let email = email.trim();
    if email.is_empty() || email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err(AuthError::InvalidEmail);
    }
    let (local, domain) = email.split_once('@').ok_or(AuthError::InvalidEmail)?;
    if local.is_empty() || domain.contains('@') {
        return Err(AuthError::InvalidEmail);
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(AuthError::InvalidEmail);
    }
    Ok(email)
}

/// Check that `code` is exactly six ASCII digits (surrounding whitespace allowed).
pub fn validate_code(code: &str) -> Result<&str, AuthError> {
    let code = code.trim();
    if code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(code)
    } else {
        Err(AuthError::InvalidCode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_valid_emails() {
        assert_eq!(validate_email(" ada@example.com ").unwrap(), "ada@example.com");
        assert!(validate_email("a.b+tag@mail.example.co.uk").is_ok());
    }

    #[test]
    fn test_invalid_emails() {
        for bad in [
            "",
            "   ",
            "ada",
            "@example.com",
            "ada@",
            "ada@example",
            "ada@example.",
            "ada@@example.com",
            "ada lovelace@example.com",
            "ada@exa mple.com",
        ] {
            assert!(validate_email(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_code_validation() {
        assert_eq!(validate_code("123456").unwrap(), "123456");
        assert_eq!(validate_code(" 004200\n").unwrap(), "004200");
        assert!(validate_code("12345").is_err());
        assert!(validate_code("1234567").is_err());
        assert!(validate_code("12a456").is_err());
        assert!(validate_code("１２３４５６").is_err());
    }

    #[test]
    fn test_token_slot_is_shared() {
        let slot = TokenSlot::new();
        let reader = slot.clone();
        assert!(reader.get().is_none());

        slot.set(Some(SecretString::from("tok")));
        assert_eq!(reader.get().unwrap().expose_secret(), "tok");
        assert!(!format!("{:?}", reader).contains("tok"));

        slot.set(None);
        assert!(reader.get().is_none());
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let session = Session {
            access_token: SecretString::from("access-abc"),
            refresh_token: SecretString::from("refresh-xyz"),
            expires_at: Utc::now(),
            user: AuthUser {
                id: "u1".into(),
                email: None,
            },
        };
        let out = format!("{:?}", session);
        assert!(!out.contains("access-abc"));
        assert!(!out.contains("refresh-xyz"));
        assert!(out.contains("u1"));
    }

    proptest! {
        #[test]
        fn prop_six_digit_codes_accepted(code in "[0-9]{6}") {
            prop_assert!(validate_code(&code).is_ok());
        }

        #[test]
        fn prop_other_lengths_rejected(code in "[0-9]{0,5}|[0-9]{7,12}") {
            prop_assert!(validate_code(&code).is_err());
        }

        #[test]
        fn prop_accepted_email_has_single_at(s in "\\PC{0,40}") {
            if let Ok(email) = validate_email(&s) {
                prop_assert_eq!(email.matches('@').count(), 1);
            }
        }
    }
}
