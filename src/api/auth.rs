//! Login, profile, and demo account endpoints.
//!
//! - POST `/auth/login` - Verify credentials and issue a token pair
//! - GET `/auth/profile` - Profile of the bearer
//! - GET `/auth/accounts` - Demo subject listing (only with `--expose-accounts`)

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;

use crate::auth::{AuthError, BearerAuth};
use crate::impl_has_token_service;
use crate::protocol::{
    ACCOUNTS_PATH, AccountSummary, Credentials, LOGIN_PATH, PROFILE_PATH, TokenPairResponse,
};
use crate::rate_limit::{RateLimitConfig, rate_limit_login};
use crate::service::TokenService;

#[derive(Clone)]
pub struct AuthState {
    pub tokens: TokenService,
    pub expose_accounts: bool,
    pub rate_limit_config: Arc<RateLimitConfig>,
}

impl_has_token_service!(AuthState);

pub fn router(state: AuthState) -> Router {
    let login_router = Router::new()
        .route(LOGIN_PATH, post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_login,
        ));

    let profile_router = Router::new()
        .route(PROFILE_PATH, get(profile))
        .with_state(state.clone());

    let router = Router::new().merge(login_router).merge(profile_router);

    if state.expose_accounts {
        router.merge(
            Router::new()
                .route(ACCOUNTS_PATH, get(accounts))
                .with_state(state),
        )
    } else {
        router
    }
}

/// A body that is not a JSON object is treated as empty credentials.
async fn login(
    State(state): State<AuthState>,
    body: Bytes,
) -> Result<impl IntoResponse, AuthError> {
    let credentials: Credentials = serde_json::from_slice(&body).unwrap_or_default();

    let issued = state
        .tokens
        .login(credentials.email.trim(), &credentials.password)
        .await
        .inspect_err(|e| tracing::info!(reason = %e, "Login rejected"))?;

    Ok(Json(TokenPairResponse {
        access_token: issued.tokens.access_token,
        refresh_token: Some(issued.tokens.refresh_token),
        user: Some(issued.subject.profile()),
    }))
}

async fn profile(BearerAuth(subject): BearerAuth) -> impl IntoResponse {
    Json(subject.profile())
}

async fn accounts(State(state): State<AuthState>) -> impl IntoResponse {
    let accounts: Vec<AccountSummary> = state
        .tokens
        .credentials()
        .subjects()
        .iter()
        .map(|s| s.summary())
        .collect();
    Json(accounts)
}
