//! Request authorization.
//!
//! Every API call goes through [`AuthorizedClient::send`], which attaches the
//! cached access token and turns a 401 into at most one renewal and retry.

use std::sync::Arc;

use reqwest::{Method, StatusCode, header};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use super::ClientError;
use super::context::{NO_ACCESS_MESSAGE, SessionContext};
use super::coordinator::RefreshCoordinator;
use crate::protocol::{LOGIN_PATH, REFRESH_PATH};

/// What to do with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Hand the response to the caller as-is.
    PassThrough,
    /// A 401 that means wrong input rather than an expired session.
    Surface,
    /// The access token expired; renew and retry once.
    Renew,
    /// The refresh token itself was rejected.
    Fatal,
}

pub fn classify(status: StatusCode, path: &str) -> Disposition {
    if status != StatusCode::UNAUTHORIZED {
        return Disposition::PassThrough;
    }
    if path_matches(path, LOGIN_PATH) {
        Disposition::Surface
    } else if path_matches(path, REFRESH_PATH) {
        Disposition::Fatal
    } else {
        Disposition::Renew
    }
}

/// Compare paths ignoring any query string and trailing slash.
fn path_matches(path: &str, route: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.trim_end_matches('/') == route
}

/// An API call, relative to the client's base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, ClientError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ClientError::InvalidResponse(format!("Failed to encode body: {}", e)))?;
        Ok(Self {
            body: Some(body),
            ..Self::new(Method::POST, path)
        })
    }

    pub fn retried(&self) -> bool {
        self.retried
    }
}

/// HTTP client that authorizes requests with the session's access token.
/// Clone is cheap: every field is shared.
#[derive(Clone)]
pub struct AuthorizedClient {
    http: reqwest::Client,
    base_url: String,
    context: Arc<SessionContext>,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthorizedClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        context: Arc<SessionContext>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            context,
            coordinator,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request, renewing and retrying once on an expired access token.
    ///
    /// Non-401 responses are returned unchanged, whatever their status.
    pub async fn send(&self, mut request: ApiRequest) -> Result<reqwest::Response, ClientError> {
        let generation = self.context.generation();
        let mut token = self.context.cache.access_token();

        loop {
            let response = self.dispatch(&request, token.as_deref()).await?;

            match classify(response.status(), &request.path) {
                Disposition::PassThrough => return Ok(response),
                Disposition::Surface => return Err(ClientError::from_response(response).await),
                Disposition::Renew
                    if !request.retried && self.context.cache.has_refresh_token() =>
                {
                    request.retried = true;
                    debug!(path = %request.path, "Access token rejected, renewing");
                    token = Some(self.coordinator.refresh_rejected(token.as_deref()).await?);
                }
                Disposition::Renew | Disposition::Fatal => {
                    // A rejection from before a login or logout must not end the new session.
                    self.context
                        .logout_if_current(generation, Some(NO_ACCESS_MESSAGE));
                    return Err(ClientError::from_response(response).await);
                }
            }
        }
    }

    /// Send and decode a successful JSON response.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, ClientError> {
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(ClientError::from_response(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send_json(ApiRequest::post(path, body)?).await
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ClientError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.http.request(request.method.clone(), &url);

        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        Ok(builder.send().await?)
    }
}
