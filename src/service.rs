//! Token issuance, rotation, and access token checks.
//!
//! Rotation is consume-then-reissue: the incoming refresh token is removed
//! from the store before a replacement is minted, and only the caller whose
//! removal succeeded may mint one. A replayed refresh token therefore always
//! fails, whether or not the rotation that consumed it ever reached its client.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::auth::{AuthError, bearer_value};
use crate::credentials::{CredentialStore, Subject};
use crate::db::{RefreshEntry, RefreshStore};
use crate::jwt::JwtConfig;

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// A token pair together with the subject it was issued to.
#[derive(Debug, Clone)]
pub struct Issued {
    pub tokens: TokenPair,
    pub subject: Subject,
}

#[derive(Clone)]
pub struct TokenService {
    jwt: Arc<JwtConfig>,
    store: Arc<dyn RefreshStore>,
    credentials: Arc<CredentialStore>,
}

impl TokenService {
    pub fn new(
        jwt: Arc<JwtConfig>,
        store: Arc<dyn RefreshStore>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            jwt,
            store,
            credentials,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn store(&self) -> &Arc<dyn RefreshStore> {
        &self.store
    }

    /// Mint a new pair for a verified subject and register the refresh token.
    pub async fn issue(&self, subject: &Subject) -> Result<TokenPair, AuthError> {
        let access = self
            .jwt
            .generate_access_token(&subject.id, &subject.email, subject.role)
            .map_err(|e| {
                error!(error = %e, "Failed to generate access token");
                AuthError::Internal
            })?;

        let refresh = self.jwt.generate_refresh_token(&subject.id).map_err(|e| {
            error!(error = %e, "Failed to generate refresh token");
            AuthError::Internal
        })?;

        self.store
            .insert(
                &refresh.token,
                RefreshEntry {
                    subject_id: subject.id.clone(),
                    issued_at: refresh.issued_at,
                    expires_at: refresh.expires_at,
                },
            )
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to register refresh token");
                AuthError::Internal
            })?;

        debug!(subject = %subject.id, jti = %refresh.jti, "Issued token pair");

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
        })
    }

    /// Verify email and password, then issue a pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<Issued, AuthError> {
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let credentials = self.credentials.clone();
        let email = email.to_string();
        let password = password.to_string();
        let subject = tokio::task::spawn_blocking(move || {
            credentials.verify(&email, &password).cloned()
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Password verification task failed");
            AuthError::Internal
        })?
        .ok_or(AuthError::InvalidCredentials)?;

        let tokens = self.issue(&subject).await?;
        info!(subject = %subject.id, "Login succeeded");
        Ok(Issued { tokens, subject })
    }

    /// Exchange a refresh token for a new pair, consuming the old one.
    pub async fn rotate(&self, incoming: Option<&str>) -> Result<Issued, AuthError> {
        let token = incoming
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingRefreshToken)?;

        let known = self.store.get(token).await.map_err(|e| {
            error!(error = %e, "Failed to look up refresh token");
            AuthError::Internal
        })?;
        if known.is_none() {
            warn!("Rejected unknown refresh token");
            return Err(AuthError::UnknownRefreshToken);
        }

        // Fail closed: a token that fails verification for any reason,
        // including clock skew, is invalidated outright.
        let claims = match self.jwt.validate_refresh_token(token) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Refresh token verification failed");
                self.discard(token).await;
                return Err(AuthError::InvalidOrExpiredRefreshToken);
            }
        };

        let Some(subject) = self.credentials.find_by_id(&claims.sub).cloned() else {
            warn!(subject = %claims.sub, "Refresh token subject no longer exists");
            self.discard(token).await;
            return Err(AuthError::SubjectNotFound);
        };

        let consumed = self.store.remove(token).await.map_err(|e| {
            error!(error = %e, "Failed to consume refresh token");
            AuthError::Internal
        })?;
        if !consumed {
            warn!(jti = %claims.jti, "Refresh token consumed by a concurrent rotation");
            return Err(AuthError::UnknownRefreshToken);
        }

        let tokens = self.issue(&subject).await?;
        info!(subject = %subject.id, jti = %claims.jti, "Rotated refresh token");
        Ok(Issued { tokens, subject })
    }

    /// Resolve the subject behind an `Authorization` header value.
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<Subject, AuthError> {
        let token = authorization
            .and_then(bearer_value)
            .ok_or(AuthError::MissingAccessToken)?;

        let claims = self
            .jwt
            .validate_access_token(token)
            .map_err(|_| AuthError::InvalidOrExpiredAccessToken)?;

        self.credentials
            .find_by_id(&claims.sub)
            .cloned()
            .ok_or(AuthError::InvalidAccessToken)
    }

    async fn discard(&self, token: &str) {
        if let Err(e) = self.store.remove(token).await {
            error!(error = %e, "Failed to discard refresh token");
        }
    }
}
