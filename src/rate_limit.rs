//! Rate limiting for the login endpoint.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down password guessing.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};

use crate::auth::client_ip;
use crate::protocol::ErrorBody;

/// Default number of login attempts allowed per client IP per minute.
pub const DEFAULT_LOGIN_PER_MINUTE: u32 = 30;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    pub login: Arc<IpLimiter>,
}

impl RateLimitConfig {
    /// A limit of zero is raised to one.
    pub fn new(login_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(login_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            login: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LOGIN_PER_MINUTE)
    }
}

/// Middleware for rate limiting login attempts.
/// Requests without connect info share a single bucket.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request).unwrap_or_else(|| "unknown".to_string());

    match config.login.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(ip = %ip, "Login rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorBody {
                    message: "Too many login attempts. Please wait before trying again."
                        .to_string(),
                }),
            )
                .into_response()
        }
    }
}
