//! Client session lifecycle.
//!
//! `Initializing` until [`SessionManager::bootstrap`] resolves to
//! `Authenticated` or `Anonymous`; after that login and logout move between
//! the two.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::info;

use super::ClientError;
use super::cache::TokenCache;
use super::context::SessionContext;
use super::coordinator::RefreshCoordinator;
use super::interceptor::{ApiRequest, AuthorizedClient};
use super::renewal::{HttpRenewer, Renewer};
use super::signals::{SessionEvent, SessionState, SessionStatus};
use super::storage::DurableStorage;
use crate::jwt::decode_unverified_expiry;
use crate::protocol::{Credentials, LOGIN_PATH, PROFILE_PATH, TokenPairResponse, UserProfile};

/// HTTP request timeout. Also bounds how long a renewal can hang.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct SessionManager {
    context: Arc<SessionContext>,
    coordinator: Arc<RefreshCoordinator>,
    client: AuthorizedClient,
}

impl SessionManager {
    /// Build a session that renews over HTTP against `config.base_url`.
    pub fn new(config: ClientConfig, storage: Arc<dyn DurableStorage>) -> Result<Self, ClientError> {
        let http = Self::http_client(&config)?;
        let renewer = Arc::new(HttpRenewer::new(http.clone(), &config.base_url));
        Ok(Self::assemble(http, &config, storage, renewer))
    }

    /// Build a session with a custom renewal transport.
    pub fn with_renewer(
        config: ClientConfig,
        storage: Arc<dyn DurableStorage>,
        renewer: Arc<dyn Renewer>,
    ) -> Result<Self, ClientError> {
        let http = Self::http_client(&config)?;
        Ok(Self::assemble(http, &config, storage, renewer))
    }

    fn http_client(config: &ClientConfig) -> Result<reqwest::Client, ClientError> {
        reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::from)
    }

    fn assemble(
        http: reqwest::Client,
        config: &ClientConfig,
        storage: Arc<dyn DurableStorage>,
        renewer: Arc<dyn Renewer>,
    ) -> Self {
        let context = Arc::new(SessionContext::new(storage));
        let coordinator = Arc::new(RefreshCoordinator::new(context.clone(), renewer));
        let client = AuthorizedClient::new(
            http,
            &config.base_url,
            context.clone(),
            coordinator.clone(),
        );
        Self {
            context,
            coordinator,
            client,
        }
    }

    /// Restore a stored session. Only acts while `Initializing`; later
    /// calls return the current status unchanged.
    pub async fn bootstrap(&self) -> SessionStatus {
        let status = self.context.signals.status();
        if status != SessionStatus::Initializing {
            return status;
        }

        if !self.context.cache.has_refresh_token() {
            self.context.logout_cascade(None);
            return SessionStatus::Anonymous;
        }

        match self.coordinator.ensure_refreshed().await {
            Ok(_) => info!("Session restored"),
            Err(e) => info!(error = %e, "Stored session could not be restored"),
        }
        self.context.signals.status()
    }

    /// Log in with email and password.
    ///
    /// On failure the server's message becomes the displayed reason and any
    /// existing tokens are left alone.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, ClientError> {
        let credentials = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };

        let result: Result<UserProfile, ClientError> = async {
            let response: TokenPairResponse = self
                .client
                .send_json(ApiRequest::post(LOGIN_PATH, &credentials)?)
                .await?;
            self.accept_login(response)
        }
        .await;

        if let Err(e) = &result {
            self.context.record_reason(&e.to_string());
        }
        result
    }

    fn accept_login(&self, response: TokenPairResponse) -> Result<UserProfile, ClientError> {
        if response.access_token.is_empty() {
            return Err(ClientError::InvalidResponse(
                "login response has no access token".to_string(),
            ));
        }
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ClientError::InvalidResponse("login response has no refresh token".to_string())
            })?;
        let profile = response.user.ok_or_else(|| {
            ClientError::InvalidResponse("login response has no profile".to_string())
        })?;

        self.context.establish(
            &response.access_token,
            &refresh_token,
            profile.clone(),
            SessionEvent::LoggedIn(profile.clone()),
        )?;
        info!(subject = %profile.id, "Logged in");
        Ok(profile)
    }

    /// End the session. Idempotent.
    pub fn logout(&self, reason: Option<&str>) {
        self.context.logout_cascade(reason);
    }

    /// Fetch the current profile and refresh the stored copy.
    pub async fn fetch_profile(&self) -> Result<UserProfile, ClientError> {
        let profile: UserProfile = self.client.get_json(PROFILE_PATH).await?;
        self.context.cache.set_profile(&profile)?;
        self.context.signals.set_profile(profile.clone());
        Ok(profile)
    }

    pub fn state(&self) -> SessionState {
        self.context.signals.state()
    }

    pub fn status(&self) -> SessionStatus {
        self.context.signals.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.context.signals.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.context.signals.events()
    }

    /// Client for further API calls within this session.
    pub fn client(&self) -> &AuthorizedClient {
        &self.client
    }

    pub fn cache(&self) -> &TokenCache {
        &self.context.cache
    }

    /// Unix expiry of the cached access token, read without verifying it.
    pub fn access_expires_at(&self) -> Option<u64> {
        let token = self.context.cache.access_token()?;
        decode_unverified_expiry(&token).ok()
    }
}
