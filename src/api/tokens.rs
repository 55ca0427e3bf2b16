//! Refresh token rotation endpoint.
//!
//! - POST `/refresh-token` - Exchange a refresh token for a new pair

use axum::{
    Json, Router, body::Bytes, extract::State, response::IntoResponse, routing::post,
};

use crate::auth::AuthError;
use crate::protocol::{REFRESH_PATH, RefreshRequest, TokenPairResponse};
use crate::service::TokenService;

#[derive(Clone)]
pub struct TokensState {
    pub tokens: TokenService,
}

pub fn router(state: TokensState) -> Router {
    Router::new()
        .route(REFRESH_PATH, post(refresh_token))
        .with_state(state)
}

/// The presented refresh token is consumed whether or not the response
/// reaches the caller. The returned refresh token always differs from it.
async fn refresh_token(
    State(state): State<TokensState>,
    body: Bytes,
) -> Result<impl IntoResponse, AuthError> {
    let request: RefreshRequest = serde_json::from_slice(&body).unwrap_or_default();

    let issued = state
        .tokens
        .rotate(request.refresh_token.as_deref())
        .await?;

    Ok(Json(TokenPairResponse {
        access_token: issued.tokens.access_token,
        refresh_token: Some(issued.tokens.refresh_token),
        user: Some(issued.subject.profile()),
    }))
}
