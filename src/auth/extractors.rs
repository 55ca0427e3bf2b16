//! Axum extractors for authentication.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::errors::AuthError;
use super::header::authorization;
use super::state::HasTokenService;
use crate::credentials::Subject;

/// Extractor for endpoints that require a valid access token.
/// Rejects with a JSON `{message}` body before the handler runs.
pub struct BearerAuth(pub Subject);

impl<S> FromRequestParts<S> for BearerAuth
where
    S: HasTokenService + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let subject = state
            .tokens()
            .authenticate(authorization(&parts.headers))
            .inspect_err(|e| tracing::debug!(reason = %e, "Rejected access token"))?;
        Ok(BearerAuth(subject))
    }
}
