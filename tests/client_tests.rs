//! Tests for the client session layer against a live server.
//!
//! Tests cover:
//! - Login success and failure
//! - Single-flight renewal across concurrent 401s
//! - Logout clearing durable storage
//! - Bootstrap from stored refresh tokens
//! - Unrecoverable 401s ending the session

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use authpair::client::{
    ApiRequest, ClientConfig, ClientError, DurableStorage, FileStorage, LEGACY_ACCESS_TOKEN_KEY,
    MemoryStorage, NO_ACCESS_MESSAGE, PROFILE_KEY, REFRESH_TOKEN_KEY, Renewer,
    SESSION_EXPIRED_MESSAGE, SessionEvent, SessionManager, SessionStatus,
};
use authpair::db::RefreshStore;
use authpair::protocol::{Role, TokenPairResponse, UserProfile};
use async_trait::async_trait;
use common::*;

fn new_session(server: &TestServer, storage: Arc<dyn DurableStorage>) -> SessionManager {
    let config = ClientConfig {
        base_url: server.base_url(),
        timeout: Duration::from_secs(5),
    };
    SessionManager::new(config, storage).unwrap()
}

#[tokio::test]
async fn test_login_stores_refresh_token_and_profile_only() {
    let server = spawn_server().await;
    let storage = Arc::new(MemoryStorage::new());
    let session = new_session(&server, storage.clone());
    let mut events = session.events();

    let profile = session.login(ADMIN_EMAIL, DEMO_PASSWORD).await.unwrap();
    assert_eq!(profile.role, Role::Admin);
    assert_eq!(session.status(), SessionStatus::Authenticated);
    assert_eq!(session.state().profile, Some(profile.clone()));

    let mut keys = storage.keys().unwrap();
    keys.sort();
    assert_eq!(keys, vec![REFRESH_TOKEN_KEY.to_string(), PROFILE_KEY.to_string()]);

    let access = session.cache().access_token().unwrap();
    for key in keys {
        assert_ne!(storage.get(&key).unwrap().unwrap(), access);
    }

    assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedIn(profile));
    assert!(session.access_expires_at().is_some());
}

#[tokio::test]
async fn test_failed_login_records_reason_and_keeps_state() {
    let server = spawn_server().await;
    let storage = Arc::new(MemoryStorage::new());
    let session = new_session(&server, storage.clone());

    let err = session.login(STUDENT_EMAIL, "wrong").await.unwrap_err();
    assert_eq!(
        err,
        ClientError::Http {
            status: 401,
            message: "Invalid credentials".to_string()
        }
    );

    let state = session.state();
    assert_eq!(state.status, SessionStatus::Initializing);
    assert_eq!(state.reason.as_deref(), Some("Invalid credentials"));
    assert!(storage.keys().unwrap().is_empty());
    // A login 401 is surfaced, never renewed.
    assert_eq!(server.refresh_calls(), 0);
}

#[tokio::test]
async fn test_concurrent_401s_trigger_one_renewal() {
    let server = spawn_server().await;
    let session = new_session(&server, Arc::new(MemoryStorage::new()));
    session.login(ADMIN_EMAIL, DEMO_PASSWORD).await.unwrap();

    session.cache().set_access_token(&expired_access_token("1"));

    let client = session.client();
    let results = futures::future::join_all(
        (0..8).map(|_| client.get_json::<UserProfile>("/auth/profile")),
    )
    .await;

    for result in results {
        assert_eq!(result.unwrap().email, ADMIN_EMAIL);
    }
    assert_eq!(server.refresh_calls(), 1);
    assert_eq!(session.status(), SessionStatus::Authenticated);

    // Only the rotated token is live server-side.
    assert_eq!(server.store.len().await.unwrap(), 1);
    let stored = session.cache().refresh_token().unwrap().unwrap();
    assert!(server.store.get(&stored).await.unwrap().is_some());
}

#[tokio::test]
async fn test_renewal_publishes_token_refreshed() {
    let server = spawn_server().await;
    let session = new_session(&server, Arc::new(MemoryStorage::new()));
    session.login(STUDENT_EMAIL, DEMO_PASSWORD).await.unwrap();
    let mut events = session.events();

    session.cache().set_access_token("stale");
    session.fetch_profile().await.unwrap();

    match events.recv().await.unwrap() {
        SessionEvent::TokenRefreshed(profile) => assert_eq!(profile.email, STUDENT_EMAIL),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_renewal_failure_logs_out_with_expired_reason() {
    let server = spawn_server().await;
    let storage = Arc::new(MemoryStorage::new());
    let session = new_session(&server, storage.clone());
    session.login(ADMIN_EMAIL, DEMO_PASSWORD).await.unwrap();
    let mut events = session.events();

    // Another device consumed the refresh token.
    storage.set(REFRESH_TOKEN_KEY, "not-a-live-token").unwrap();
    session.cache().set_access_token("stale");

    let err = session.fetch_profile().await.unwrap_err();
    assert_eq!(err.status(), Some(401));

    let state = session.state();
    assert_eq!(state.status, SessionStatus::Anonymous);
    assert_eq!(state.reason.as_deref(), Some(SESSION_EXPIRED_MESSAGE));
    assert!(storage.keys().unwrap().is_empty());
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::LoggedOut {
            reason: Some(SESSION_EXPIRED_MESSAGE.to_string())
        }
    );
}

/// Renews successfully but hands back an access token the server refuses.
struct BogusRenewer {
    calls: AtomicUsize,
}

#[async_trait]
impl Renewer for BogusRenewer {
    async fn renew(&self, _refresh_token: &str) -> Result<TokenPairResponse, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TokenPairResponse {
            access_token: "bogus-access".to_string(),
            refresh_token: Some("bogus-refresh".to_string()),
            user: Some(UserProfile {
                id: "1".to_string(),
                email: ADMIN_EMAIL.to_string(),
                role: Role::Admin,
                name: "Admin User".to_string(),
            }),
        })
    }
}

#[tokio::test]
async fn test_retry_happens_at_most_once() {
    let server = spawn_server().await;
    let renewer = Arc::new(BogusRenewer {
        calls: AtomicUsize::new(0),
    });
    let session = SessionManager::with_renewer(
        ClientConfig::new(server.base_url()),
        Arc::new(MemoryStorage::new()),
        renewer.clone(),
    )
    .unwrap();
    session.login(ADMIN_EMAIL, DEMO_PASSWORD).await.unwrap();
    session.cache().set_access_token("stale");

    let err = session
        .client()
        .send(ApiRequest::get("/auth/profile"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(renewer.calls.load(Ordering::SeqCst), 1);

    let state = session.state();
    assert_eq!(state.status, SessionStatus::Anonymous);
    assert_eq!(state.reason.as_deref(), Some(NO_ACCESS_MESSAGE));
}

#[tokio::test]
async fn test_401_without_refresh_token_ends_session() {
    let server = spawn_server().await;
    let storage = Arc::new(MemoryStorage::new());
    let session = new_session(&server, storage.clone());
    session.login(ADMIN_EMAIL, DEMO_PASSWORD).await.unwrap();

    storage.remove(REFRESH_TOKEN_KEY).unwrap();
    session.cache().set_access_token("stale");

    let err = session.fetch_profile().await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(server.refresh_calls(), 0);

    let state = session.state();
    assert_eq!(state.status, SessionStatus::Anonymous);
    assert_eq!(state.reason.as_deref(), Some(NO_ACCESS_MESSAGE));
}

#[tokio::test]
async fn test_logout_clears_storage_in_any_state() {
    let server = spawn_server().await;

    // Authenticated
    let storage = Arc::new(MemoryStorage::new());
    let session = new_session(&server, storage.clone());
    session.login(ADMIN_EMAIL, DEMO_PASSWORD).await.unwrap();
    session.logout(None);
    assert!(storage.keys().unwrap().is_empty());
    assert!(session.cache().access_token().is_none());
    assert_eq!(session.status(), SessionStatus::Anonymous);

    // Initializing, with leftovers from an older client
    let storage = Arc::new(MemoryStorage::new());
    storage.set(REFRESH_TOKEN_KEY, "r").unwrap();
    storage.set(PROFILE_KEY, "{}").unwrap();
    let session = new_session(&server, storage.clone());
    storage.set(LEGACY_ACCESS_TOKEN_KEY, "a").unwrap();
    session.logout(Some("bye"));
    session.logout(Some("bye"));
    assert!(storage.keys().unwrap().is_empty());
    assert_eq!(session.state().reason.as_deref(), Some("bye"));
}

#[tokio::test]
async fn test_bootstrap_without_refresh_token_is_anonymous() {
    let server = spawn_server().await;
    let session = new_session(&server, Arc::new(MemoryStorage::new()));

    assert_eq!(session.bootstrap().await, SessionStatus::Anonymous);
    assert_eq!(server.refresh_calls(), 0);
    assert!(session.state().reason.is_none());
}

#[tokio::test]
async fn test_bootstrap_restores_session_from_file_storage() {
    let server = spawn_server().await;
    let path = std::env::temp_dir().join(format!("authpair-bootstrap-{}.json", uuid::Uuid::new_v4()));

    let first = new_session(&server, Arc::new(FileStorage::new(&path)));
    first.login(STUDENT_EMAIL, DEMO_PASSWORD).await.unwrap();
    drop(first);

    let second = new_session(&server, Arc::new(FileStorage::new(&path)));
    assert_eq!(second.status(), SessionStatus::Initializing);
    assert_eq!(second.bootstrap().await, SessionStatus::Authenticated);
    assert_eq!(second.state().profile.unwrap().email, STUDENT_EMAIL);
    assert_eq!(server.refresh_calls(), 1);

    // Bootstrap only acts once.
    assert_eq!(second.bootstrap().await, SessionStatus::Authenticated);
    assert_eq!(server.refresh_calls(), 1);

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_bootstrap_with_unknown_refresh_token() {
    let server = spawn_server().await;
    let storage = Arc::new(MemoryStorage::new());
    storage.set(REFRESH_TOKEN_KEY, "never-issued").unwrap();
    let session = new_session(&server, storage.clone());

    assert_eq!(session.bootstrap().await, SessionStatus::Anonymous);
    assert!(storage.keys().unwrap().is_empty());
    assert_eq!(
        session.state().reason.as_deref(),
        Some(SESSION_EXPIRED_MESSAGE)
    );
}

#[tokio::test]
async fn test_replayed_refresh_token_after_renewal() {
    let server = spawn_server().await;
    let storage = Arc::new(MemoryStorage::new());
    let session = new_session(&server, storage.clone());
    session.login(ADMIN_EMAIL, DEMO_PASSWORD).await.unwrap();
    let original = session.cache().refresh_token().unwrap().unwrap();

    session.cache().set_access_token("stale");
    session.fetch_profile().await.unwrap();

    // A copy of the old durable entry is worthless now.
    let stolen = Arc::new(MemoryStorage::new());
    stolen.set(REFRESH_TOKEN_KEY, &original).unwrap();
    let thief = new_session(&server, stolen);
    assert_eq!(thief.bootstrap().await, SessionStatus::Anonymous);
}
