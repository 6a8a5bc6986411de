use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::auth::{validate_email, AuthClient, AuthError, AuthUser, Session, TokenSlot};
use crate::backend::Profile;
use crate::collections::{CollectionClient, CollectionError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error("Please log in to use this feature.")]
    NotSignedIn,

    #[error("No sign-in code has been requested yet")]
    NoPendingEmail,

    #[error("Failed to persist session at {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// On-disk form of a [`Session`].
#[derive(Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
    user: AuthUser,
}

impl From<&Session> for StoredSession {
    fn from(session: &Session) -> Self {
        Self {
            access_token: session.access_token.expose_secret().to_string(),
            refresh_token: session.refresh_token.expose_secret().to_string(),
            expires_at: session.expires_at,
            user: session.user.clone(),
        }
    }
}

impl From<StoredSession> for Session {
    fn from(stored: StoredSession) -> Self {
        Self {
            access_token: SecretString::from(stored.access_token),
            refresh_token: SecretString::from(stored.refresh_token),
            expires_at: stored.expires_at,
            user: stored.user,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user: Option<AuthUser>,
    pub profile: Profile,
    pub is_loading: bool,
}

#[derive(Default)]
struct SessionState {
    session: Option<Session>,
    profile: Profile,
    is_loading: bool,
    pending_email: Option<String>,
}

/// The signed-in identity and its profile.
///
/// Installing a session also publishes its access token through the shared
/// [`TokenSlot`], so data store requests made afterwards run as that user.
/// With a `path`, sessions survive restarts in a user-only JSON file.
pub struct SessionStore {
    auth: AuthClient,
    collections: CollectionClient,
    tokens: TokenSlot,
    path: Option<PathBuf>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("user", &self.user())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(
        auth: AuthClient,
        collections: CollectionClient,
        tokens: TokenSlot,
        path: Option<PathBuf>,
    ) -> Self {
        Self {
            auth,
            collections,
            tokens,
            path,
            state: Mutex::new(SessionState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            user: state.session.as_ref().map(|s| s.user.clone()),
            profile: state.profile.clone(),
            is_loading: state.is_loading,
        }
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.lock().session.as_ref().map(|s| s.user.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        self.lock().session.as_ref().map(|s| s.user.id.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.lock().session.is_some()
    }

    fn set_loading(&self, loading: bool) {
        self.lock().is_loading = loading;
    }

    // ========================================================================
    // Sign-in
    // ========================================================================

    /// Email a sign-in code to `email`.
    pub async fn request_code(&self, email: &str) -> Result<(), SessionError> {
        let email = validate_email(email)?.to_string();
        self.set_loading(true);
        let result = self.auth.request_code(&email).await;
        let mut state = self.lock();
        state.is_loading = false;
        result?;
        state.pending_email = Some(email);
        Ok(())
    }

    /// Send another code to the address of the last [`request_code`](Self::request_code).
    pub async fn resend_code(&self) -> Result<(), SessionError> {
        let email = self
            .lock()
            .pending_email
            .clone()
            .ok_or(SessionError::NoPendingEmail)?;
        self.request_code(&email).await
    }

    /// Exchange a code for a session, persist it and load the profile.
    pub async fn verify_code(&self, email: &str, code: &str) -> Result<AuthUser, SessionError> {
        self.set_loading(true);
        let result = self.auth.verify_code(email, code).await;
        let session = match result {
            Ok(session) => session,
            Err(e) => {
                self.set_loading(false);
                return Err(e.into());
            }
        };
        let user = session.user.clone();

        if let Some(path) = &self.path {
            if let Err(e) = write_session_file(path, &session) {
                self.set_loading(false);
                return Err(e);
            }
        }
        self.install(session);
        self.lock().pending_email = None;

        if let Err(e) = self.refresh_profile().await {
            tracing::warn!(error = %e, "Signed in but profile could not be loaded");
        }
        self.set_loading(false);
        Ok(user)
    }

    /// Make `session` current without contacting the auth service.
    pub fn install(&self, session: Session) {
        self.tokens.set(Some(session.access_token.clone()));
        let mut state = self.lock();
        state.session = Some(session);
        state.profile = Profile::default();
    }

    /// Load the persisted session, if any.
    ///
    /// Expired or unreadable session files are removed and treated as
    /// signed out.
    pub fn restore(&self) -> Result<Option<AuthUser>, SessionError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let stored = std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<StoredSession>(&bytes).ok());
        let session = match stored.map(Session::from) {
            Some(session) if !session.is_expired() => session,
            Some(_) => {
                tracing::info!("Stored session expired, signing out");
                remove_session_file(path)?;
                return Ok(None);
            }
            None => {
                tracing::warn!(path = %path.display(), "Ignoring unreadable session file");
                remove_session_file(path)?;
                return Ok(None);
            }
        };

        let user = session.user.clone();
        self.install(session);
        tracing::debug!(user_id = %user.id, "Session restored");
        Ok(Some(user))
    }

    /// Sign out remotely (best effort) and forget the local session.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        let token = self.lock().session.as_ref().map(|s| s.access_token.clone());
        if let Some(token) = token {
            if let Err(e) = self.auth.sign_out(&token).await {
                tracing::warn!(error = %e, "Remote sign-out failed, clearing local session anyway");
            }
        }

        self.tokens.set(None);
        *self.lock() = SessionState::default();
        if let Some(path) = &self.path {
            remove_session_file(path)?;
        }
        tracing::info!("Signed out");
        Ok(())
    }

    // ========================================================================
    // Profile
    // ========================================================================

    /// Ask the auth service who the current token belongs to and keep the
    /// answer, so a changed email is picked up.
    pub async fn refresh_user(&self) -> Result<AuthUser, SessionError> {
        let token = self
            .lock()
            .session
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(SessionError::NotSignedIn)?;
        let user = self.auth.current_user(&token).await?;

        let mut state = self.lock();
        let Some(session) = state.session.as_mut() else {
            return Err(SessionError::NotSignedIn);
        };
        if session.user != user {
            session.user = user.clone();
            if let Some(path) = &self.path {
                write_session_file(path, session)?;
            }
            tracing::debug!(user_id = %user.id, "Session user updated");
        }
        Ok(user)
    }

    pub async fn refresh_profile(&self) -> Result<Profile, SessionError> {
        let user_id = self.user_id().ok_or(SessionError::NotSignedIn)?;
        let profile = self.collections.get_profile(&user_id).await?;
        self.lock().profile = profile.clone();
        Ok(profile)
    }

    pub async fn update_profile(&self, full_name: &str, avatar: u8) -> Result<Profile, SessionError> {
        let user = self.user().ok_or(SessionError::NotSignedIn)?;
        self.set_loading(true);
        let result = self
            .collections
            .update_profile(&user.id, user.email.as_deref(), full_name, avatar)
            .await;
        let mut state = self.lock();
        state.is_loading = false;
        let profile = result?;
        state.profile = profile.clone();
        Ok(profile)
    }
}

// ============================================================================
// Session File
// ============================================================================

/// Write the session via temp file + rename so a crash never leaves a
/// truncated file. The file is readable by the owner only.
fn write_session_file(path: &Path, session: &Session) -> Result<(), SessionError> {
    let persist_err = |source| SessionError::Persist {
        path: path.display().to_string(),
        source,
    };

    let body = serde_json::to_vec_pretty(&StoredSession::from(session))
        .map_err(|e| persist_err(std::io::Error::other(e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(persist_err)?;
    }

    use std::time::{SystemTime, UNIX_EPOCH};
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", suffix));

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let written = options.open(&temp_path).and_then(|mut file| {
        file.write_all(&body)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(persist_err(e));
    }

    #[cfg(windows)]
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }

    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        persist_err(e)
    })
}

fn remove_session_file(path: &Path) -> Result<(), SessionError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SessionError::Persist {
            path: path.display().to_string(),
            source,
        }),
    }
}
