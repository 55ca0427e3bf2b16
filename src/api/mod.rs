mod auth;
mod tokens;

use axum::Router;
use std::sync::Arc;

use crate::rate_limit::RateLimitConfig;
use crate::service::TokenService;

/// Create the API router.
pub fn create_api_router(
    tokens: TokenService,
    expose_accounts: bool,
    rate_limit_config: Arc<RateLimitConfig>,
) -> Router {
    let auth_state = auth::AuthState {
        tokens: tokens.clone(),
        expose_accounts,
        rate_limit_config,
    };

    let tokens_state = tokens::TokensState { tokens };

    Router::new()
        .merge(auth::router(auth_state))
        .merge(tokens::router(tokens_state))
}
