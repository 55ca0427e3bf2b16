//! The network call behind a token renewal.

use async_trait::async_trait;

use super::ClientError;
use crate::protocol::{REFRESH_PATH, RefreshRequest, TokenPairResponse};

/// Exchanges a refresh token for a new pair.
#[async_trait]
pub trait Renewer: Send + Sync {
    async fn renew(&self, refresh_token: &str) -> Result<TokenPairResponse, ClientError>;
}

/// Posts to `/refresh-token` on a plain client, bypassing the
/// authorization interceptor so renewal can never recurse into itself.
pub struct HttpRenewer {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRenewer {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Renewer for HttpRenewer {
    async fn renew(&self, refresh_token: &str) -> Result<TokenPairResponse, ClientError> {
        let url = format!("{}{}", self.base_url, REFRESH_PATH);
        let response = self
            .http
            .post(&url)
            .json(&RefreshRequest {
                refresh_token: Some(refresh_token.to_string()),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::from_response(response).await);
        }

        response
            .json::<TokenPairResponse>()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}
