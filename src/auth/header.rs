//! Authorization header parsing.

use axum::http::{HeaderMap, header};

/// Extract the credential from a `Bearer <token>` header value.
pub fn bearer_value(value: &str) -> Option<&str> {
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Raw `Authorization` header value, if present and valid UTF-8.
pub fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION)?.to_str().ok()
}
