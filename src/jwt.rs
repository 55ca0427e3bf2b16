//! JWT token generation and validation.
//!
//! Access and refresh tokens are signed with two independent HS256 secrets,
//! so a leaked refresh secret cannot mint access tokens and vice versa.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::protocol::Role;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived access token - stateless, never stored
    Access,
    /// Longer-lived refresh token - registered in the refresh store
    Refresh,
}

/// JWT claims for access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject id
    pub sub: String,
    pub email: String,
    pub role: Role,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// JWT claims for refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// JWT ID, makes every refresh token value unique
    pub jti: String,
    /// Subject id
    pub sub: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    pub iat: u64,
    pub exp: u64,
}

/// Access token duration: 2 minutes
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(2 * 60);

/// Refresh token duration: 30 minutes
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(30 * 60);

/// Signing keys and lifetimes for both token kinds.
#[derive(Clone)]
pub struct JwtConfig {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

/// Result of generating an access token.
#[derive(Debug, Clone)]
pub struct AccessTokenResult {
    pub token: String,
    pub expires_at: u64,
}

/// Result of generating a refresh token.
#[derive(Debug, Clone)]
pub struct RefreshTokenResult {
    pub token: String,
    pub jti: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// Current Unix time in seconds.
pub fn unix_now() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

impl JwtConfig {
    /// Create a configuration with default lifetimes.
    pub fn new(access_secret: &[u8], refresh_secret: &[u8]) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access_secret),
            access_decoding: DecodingKey::from_secret(access_secret),
            refresh_encoding: EncodingKey::from_secret(refresh_secret),
            refresh_decoding: DecodingKey::from_secret(refresh_secret),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
        }
    }

    pub fn with_ttls(mut self, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        self.access_ttl = access_ttl;
        self.refresh_ttl = refresh_ttl;
        self
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Generate an access token for a subject.
    pub fn generate_access_token(
        &self,
        subject_id: &str,
        email: &str,
        role: Role,
    ) -> Result<AccessTokenResult, JwtError> {
        let now = unix_now()?;
        let exp = expiry(now, self.access_ttl)?;

        let claims = AccessClaims {
            sub: subject_id.to_string(),
            email: email.to_string(),
            role,
            token_type: TokenType::Access,
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.access_encoding)
            .map_err(JwtError::Encoding)?;

        Ok(AccessTokenResult {
            token,
            expires_at: exp,
        })
    }

    /// Generate a refresh token for a subject with a fresh JTI.
    pub fn generate_refresh_token(&self, subject_id: &str) -> Result<RefreshTokenResult, JwtError> {
        let now = unix_now()?;

        let jti = uuid::Uuid::new_v4().to_string();
        let exp = expiry(now, self.refresh_ttl)?;

        let claims = RefreshClaims {
            jti: jti.clone(),
            sub: subject_id.to_string(),
            token_type: TokenType::Refresh,
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.refresh_encoding)
            .map_err(JwtError::Encoding)?;

        Ok(RefreshTokenResult {
            token,
            jti,
            issued_at: now,
            expires_at: exp,
        })
    }

    /// Validate and decode an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let token_data =
            jsonwebtoken::decode::<AccessClaims>(token, &self.access_decoding, &strict())
                .map_err(JwtError::Decoding)?;

        if token_data.claims.token_type != TokenType::Access {
            return Err(JwtError::WrongTokenType);
        }

        Ok(token_data.claims)
    }

    /// Validate and decode a refresh token.
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        let token_data =
            jsonwebtoken::decode::<RefreshClaims>(token, &self.refresh_decoding, &strict())
                .map_err(JwtError::Decoding)?;

        if token_data.claims.token_type != TokenType::Refresh {
            return Err(JwtError::WrongTokenType);
        }

        Ok(token_data.claims)
    }
}

fn expiry(now: u64, ttl: Duration) -> Result<u64, JwtError> {
    now.checked_add(ttl.as_secs())
        .ok_or(JwtError::ExpiryOverflow)
}

fn strict() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation
}

#[derive(Deserialize)]
struct ExpiryOnly {
    exp: u64,
}

/// Read the `exp` claim without verifying the signature.
///
/// For client-side display only. The client holds no secrets, and nothing
/// read here is ever trusted for authorization.
pub fn decode_unverified_expiry(token: &str) -> Result<u64, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<ExpiryOnly>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims.exp)
        .map_err(JwtError::Decoding)
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    Encoding(jsonwebtoken::errors::Error),
    Decoding(jsonwebtoken::errors::Error),
    TimeError,
    /// Wrong token type (e.g., refresh token presented as access token)
    WrongTokenType,
    /// Lifetime too large to express as a Unix timestamp
    ExpiryOverflow,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Decoding(e) => write!(f, "Failed to decode token: {}", e),
            JwtError::TimeError => write!(f, "System time error"),
            JwtError::WrongTokenType => write!(f, "Wrong token type"),
            JwtError::ExpiryOverflow => write!(f, "Token lifetime out of range"),
        }
    }
}

impl std::error::Error for JwtError {}
