use thiserror::Error;

use crate::protocol::ErrorBody;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Client-side failures.
///
/// `Clone` so a single renewal outcome can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Token renewal was aborted")]
    RenewalAborted,
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Network(e.to_string())
    }
}

impl ClientError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Build an error from a status and body. A `{message}` body is unwrapped.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => parsed.message,
            Err(_) if body.trim().is_empty() => status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string(),
            Err(_) => Self::truncate_body(body),
        };
        ClientError::Http {
            status: status.as_u16(),
            message,
        }
    }

    /// Consume a non-success response into an error.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        match response.text().await {
            Ok(body) => Self::from_status(status, &body),
            Err(e) => e.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
