pub mod api;
pub mod auth;
pub mod check;
pub mod cleanup;
pub mod cli;
pub mod client;
pub mod cors;
pub mod credentials;
pub mod db;
pub mod jwt;
pub mod protocol;
pub mod rate_limit;
pub mod service;

use api::create_api_router;
use axum::{Json, Router, middleware, response::IntoResponse, routing::get};
use cors::{AllowedOrigins, reject_disallowed_origin};
use credentials::CredentialStore;
use db::RefreshStore;
use jwt::JwtConfig;
use rate_limit::RateLimitConfig;
use service::TokenService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Secret for signing access tokens
    pub access_secret: Vec<u8>,
    /// Secret for signing refresh tokens, distinct from the access secret
    pub refresh_secret: Vec<u8>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Refresh token validity store (in-memory or SQLite)
    pub store: Arc<dyn RefreshStore>,
    /// Subjects allowed to log in
    pub credentials: Arc<CredentialStore>,
    pub allowed_origins: AllowedOrigins,
    /// Whether `GET /auth/accounts` lists the demo subjects
    pub expose_accounts: bool,
    /// Login attempts allowed per client IP per minute
    pub login_rate_per_minute: u32,
}

impl ServerConfig {
    /// Build the token service this configuration describes.
    pub fn token_service(&self) -> TokenService {
        let jwt = JwtConfig::new(&self.access_secret, &self.refresh_secret)
            .with_ttls(self.access_ttl, self.refresh_ttl);
        TokenService::new(Arc::new(jwt), self.store.clone(), self.credentials.clone())
    }
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let api_router = create_api_router(
        config.token_service(),
        config.expose_accounts,
        Arc::new(RateLimitConfig::new(config.login_rate_per_minute)),
    );

    let allowed = Arc::new(config.allowed_origins.clone());

    Router::new()
        .route("/", get(index))
        .merge(api_router)
        .layer(config.allowed_origins.cors_layer())
        .layer(middleware::from_fn_with_state(
            allowed,
            reject_disallowed_origin,
        ))
}

async fn index() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "endpoints": [
            format!("POST {}", protocol::LOGIN_PATH),
            format!("GET {}", protocol::PROFILE_PATH),
            format!("POST {}", protocol::REFRESH_PATH),
        ],
    }))
}

/// Run cleanup once and spawn the background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(store: &Arc<dyn RefreshStore>) -> tokio::task::JoinHandle<()> {
    cleanup::run_cleanup(store.as_ref()).await;
    cleanup::spawn_cleanup_scheduler(store.clone(), cleanup::CLEANUP_INTERVAL)
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    init_cleanup(&config.store).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
