//! Integration tests for the session store: one-time-code sign-in against a
//! mocked auth service, session persistence and sign-out.

use pretty_assertions::assert_eq;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use streamshelf::auth::{AuthClient, AuthError, TokenSlot};
use streamshelf::backend::SqliteStore;
use streamshelf::catalog::CatalogClient;
use streamshelf::collections::CollectionClient;
use streamshelf::store::{SessionError, SessionStore};

fn session_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "streamshelf-it-session-{}-{}",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir.join("session.json")
}

async fn session_store(server: &MockServer, tokens: TokenSlot, path: Option<PathBuf>) -> SessionStore {
    let data = SqliteStore::open(":memory:").await.unwrap();
    let catalog = CatalogClient::new(
        reqwest::Client::new(),
        &server.uri(),
        SecretString::from("key"),
    )
    .unwrap();
    let auth = AuthClient::new(
        reqwest::Client::new(),
        &server.uri(),
        SecretString::from("anon"),
    )
    .unwrap();
    SessionStore::new(
        auth,
        CollectionClient::new(Arc::new(data), catalog),
        tokens,
        path,
    )
}

async fn mount_sign_in(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/v1/otp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "expires_in": 3600,
            "user": {"id": "user-1", "email": "ada@example.com"}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_invalid_email_rejected_before_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = session_store(&server, TokenSlot::new(), None).await;
    let result = store.request_code("ada.example.com").await;
    assert!(matches!(
        result,
        Err(SessionError::Auth(AuthError::InvalidEmail))
    ));
    assert!(!store.snapshot().is_loading);
}

#[tokio::test]
async fn test_sign_in_persists_and_restores() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;
    let file = session_path("restore");

    let tokens = TokenSlot::new();
    let store = session_store(&server, tokens.clone(), Some(file.clone())).await;
    store.request_code("ada@example.com").await.unwrap();
    let user = store.verify_code("ada@example.com", "123456").await.unwrap();

    assert_eq!(user.id, "user-1");
    assert_eq!(store.user_id().as_deref(), Some("user-1"));
    assert_eq!(tokens.get().unwrap().expose_secret(), "access-1");
    assert!(file.exists());
    assert!(!store.snapshot().is_loading);

    // a fresh process picks the session up from disk
    let restored_tokens = TokenSlot::new();
    let restored = session_store(&server, restored_tokens.clone(), Some(file.clone())).await;
    let user = restored.restore().unwrap().unwrap();
    assert_eq!(user.email.as_deref(), Some("ada@example.com"));
    assert_eq!(restored_tokens.get().unwrap().expose_secret(), "access-1");

    let _ = std::fs::remove_file(&file);
}

#[tokio::test]
async fn test_expired_session_is_discarded() {
    let server = MockServer::start().await;
    let file = session_path("expired");
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(
        &file,
        json!({
            "access_token": "old",
            "refresh_token": "old",
            "expires_at": "2020-01-01T00:00:00Z",
            "user": {"id": "user-1", "email": null}
        })
        .to_string(),
    )
    .unwrap();

    let store = session_store(&server, TokenSlot::new(), Some(file.clone())).await;
    assert!(store.restore().unwrap().is_none());
    assert!(!store.is_signed_in());
    assert!(!file.exists());
}

#[tokio::test]
async fn test_corrupt_session_file_is_discarded() {
    let server = MockServer::start().await;
    let file = session_path("corrupt");
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(&file, "{ not json").unwrap();

    let store = session_store(&server, TokenSlot::new(), Some(file.clone())).await;
    assert!(store.restore().unwrap().is_none());
    assert!(!file.exists());
}

#[tokio::test]
async fn test_sign_out_clears_everything() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    let file = session_path("sign-out");

    let tokens = TokenSlot::new();
    let store = session_store(&server, tokens.clone(), Some(file.clone())).await;
    store.verify_code("ada@example.com", "654321").await.unwrap();
    store.sign_out().await.unwrap();

    assert!(!store.is_signed_in());
    assert!(tokens.get().is_none());
    assert!(!file.exists());
}

#[tokio::test]
async fn test_sign_out_survives_remote_failure() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = session_store(&server, TokenSlot::new(), None).await;
    store.verify_code("ada@example.com", "654321").await.unwrap();
    store.sign_out().await.unwrap();
    assert!(!store.is_signed_in());
}

#[tokio::test]
async fn test_resend_uses_last_requested_email() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/otp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(2)
        .mount(&server)
        .await;

    let store = session_store(&server, TokenSlot::new(), None).await;
    assert!(matches!(
        store.resend_code().await,
        Err(SessionError::NoPendingEmail)
    ));

    store.request_code("ada@example.com").await.unwrap();
    store.resend_code().await.unwrap();
}

#[tokio::test]
async fn test_profile_update_requires_sign_in() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;

    let store = session_store(&server, TokenSlot::new(), None).await;
    assert!(matches!(
        store.update_profile("Ada", 2).await,
        Err(SessionError::NotSignedIn)
    ));

    store.verify_code("ada@example.com", "111111").await.unwrap();
    let profile = store.update_profile("Ada Lovelace", 2).await.unwrap();
    assert_eq!(profile.full_name, "Ada Lovelace");
    assert_eq!(store.snapshot().profile.profile_picture, 2);
    assert_eq!(store.refresh_profile().await.unwrap(), profile);
}

#[tokio::test]
async fn test_refresh_user_picks_up_changed_email() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "user-1",
            "email": "ada@lovelace.example"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let file = session_path("refresh-user");

    let store = session_store(&server, TokenSlot::new(), Some(file.clone())).await;
    assert!(matches!(
        store.refresh_user().await,
        Err(SessionError::NotSignedIn)
    ));

    store.verify_code("ada@example.com", "123456").await.unwrap();
    let user = store.refresh_user().await.unwrap();
    assert_eq!(user.email.as_deref(), Some("ada@lovelace.example"));
    assert_eq!(store.user(), Some(user));

    let restored = session_store(&server, TokenSlot::new(), Some(file.clone())).await;
    let user = restored.restore().unwrap().unwrap();
    assert_eq!(user.email.as_deref(), Some("ada@lovelace.example"));

    let _ = std::fs::remove_file(&file);
}
