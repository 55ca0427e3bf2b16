//! Cross-origin policy.
//!
//! Only allow-listed origins may call the API, with credentials. A request
//! carrying any other `Origin` is answered with 403 before routing.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use url::Url;

use crate::auth::AuthError;

/// Default allow-list when none is configured.
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";

#[derive(Debug)]
pub enum OriginError {
    Parse(String, url::ParseError),
    /// Schemes like `file:` have no tuple origin.
    Opaque(String),
    Empty,
}

impl std::fmt::Display for OriginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OriginError::Parse(origin, e) => write!(f, "Invalid origin '{}': {}", origin, e),
            OriginError::Opaque(origin) => write!(f, "Origin '{}' has no host", origin),
            OriginError::Empty => write!(f, "No allowed origins configured"),
        }
    }
}

impl std::error::Error for OriginError {}

/// Normalized allow-list of origins (`scheme://host[:port]`).
#[derive(Debug, Clone)]
pub struct AllowedOrigins {
    origins: Vec<String>,
}

impl AllowedOrigins {
    /// Parse a comma-separated list. Paths and trailing slashes are dropped.
    pub fn parse(list: &str) -> Result<Self, OriginError> {
        let mut origins = Vec::new();
        for raw in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let url = Url::parse(raw).map_err(|e| OriginError::Parse(raw.to_string(), e))?;
            let origin = url.origin();
            if !origin.is_tuple() {
                return Err(OriginError::Opaque(raw.to_string()));
            }
            let serialized = origin.ascii_serialization();
            if !origins.contains(&serialized) {
                origins.push(serialized);
            }
        }

        if origins.is_empty() {
            return Err(OriginError::Empty);
        }
        Ok(Self { origins })
    }

    pub fn contains(&self, origin: &str) -> bool {
        self.origins.iter().any(|o| o == origin)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.origins
    }

    /// CORS layer answering preflights and echoing allowed origins with credentials.
    pub fn cors_layer(&self) -> CorsLayer {
        let values: Vec<HeaderValue> = self
            .origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(values))
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    }
}

impl Default for AllowedOrigins {
    fn default() -> Self {
        Self {
            origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
        }
    }
}

/// Middleware rejecting requests whose `Origin` is not allow-listed.
/// Requests without an `Origin` header pass through.
pub async fn reject_disallowed_origin(
    State(allowed): State<Arc<AllowedOrigins>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = match request.headers().get(header::ORIGIN) {
        None => return next.run(request).await,
        Some(value) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
    };

    if allowed.contains(&origin) {
        next.run(request).await
    } else {
        tracing::warn!(origin = %origin, path = %request.uri().path(), "Rejected cross-origin request");
        AuthError::OriginNotAllowed(origin).into_response()
    }
}
