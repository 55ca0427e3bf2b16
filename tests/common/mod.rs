#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use authpair::cors::AllowedOrigins;
use authpair::credentials::CredentialStore;
use authpair::db::{MemoryRefreshStore, RefreshStore};
use authpair::jwt::{AccessClaims, JwtConfig, RefreshClaims, TokenType, unix_now};
use authpair::protocol::{REFRESH_PATH, Role, TokenPairResponse};
use authpair::{ServerConfig, create_app};
use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
    middleware::{self, Next},
};
use jsonwebtoken::{EncodingKey, Header};
use tokio::net::TcpListener;

pub const ACCESS_SECRET: &[u8] = b"integration-access-secret-0123456789";
pub const REFRESH_SECRET: &[u8] = b"integration-refresh-secret-987654321";
pub const ALLOWED_ORIGIN: &str = "http://localhost:5173";

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const STUDENT_EMAIL: &str = "student@example.com";
pub const DEMO_PASSWORD: &str = "123456";

pub fn test_config(store: Arc<dyn RefreshStore>) -> ServerConfig {
    ServerConfig {
        access_secret: ACCESS_SECRET.to_vec(),
        refresh_secret: REFRESH_SECRET.to_vec(),
        access_ttl: Duration::from_secs(120),
        refresh_ttl: Duration::from_secs(1800),
        store,
        credentials: Arc::new(CredentialStore::demo().expect("demo credentials")),
        allowed_origins: AllowedOrigins::parse(ALLOWED_ORIGIN).expect("origin"),
        expose_accounts: true,
        login_rate_per_minute: 1000,
    }
}

/// Create a test app backed by an in-memory store.
pub fn create_test_app() -> (Router, Arc<dyn RefreshStore>) {
    let store: Arc<dyn RefreshStore> = Arc::new(MemoryRefreshStore::new());
    (create_app(&test_config(store.clone())), store)
}

pub fn jwt() -> JwtConfig {
    JwtConfig::new(ACCESS_SECRET, REFRESH_SECRET)
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_with_bearer(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn read_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub async fn read_pair(response: Response<Body>) -> TokenPairResponse {
    serde_json::from_value(read_json(response).await).unwrap()
}

/// Access token signed with the right secret but already expired.
pub fn expired_access_token(subject_id: &str) -> String {
    let now = unix_now().unwrap();
    let claims = AccessClaims {
        sub: subject_id.to_string(),
        email: ADMIN_EMAIL.to_string(),
        role: Role::Admin,
        token_type: TokenType::Access,
        iat: now - 300,
        exp: now - 60,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(ACCESS_SECRET),
    )
    .unwrap()
}

/// Refresh token signed with the right secret but already expired.
pub fn expired_refresh_token(subject_id: &str) -> (String, RefreshClaims) {
    let now = unix_now().unwrap();
    let claims = RefreshClaims {
        jti: uuid::Uuid::new_v4().to_string(),
        sub: subject_id.to_string(),
        token_type: TokenType::Refresh,
        iat: now - 3600,
        exp: now - 60,
    };
    let token = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(REFRESH_SECRET),
    )
    .unwrap();
    (token, claims)
}

/// A running server plus a count of `/refresh-token` requests it received.
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<dyn RefreshStore>,
    refresh_calls: Arc<AtomicUsize>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_server() -> TestServer {
    spawn_server_with(|_| {}).await
}

pub async fn spawn_server_with(adjust: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let mut config = test_config(Arc::new(MemoryRefreshStore::new()));
    adjust(&mut config);

    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let counter = refresh_calls.clone();
    let app = create_app(&config).layer(middleware::from_fn(
        move |request: Request<Body>, next: Next| {
            let counter = counter.clone();
            async move {
                if request.uri().path() == REFRESH_PATH {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                next.run(request).await
            }
        },
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .ok();
    });

    TestServer {
        addr,
        store: config.store,
        refresh_calls,
        handle,
    }
}
