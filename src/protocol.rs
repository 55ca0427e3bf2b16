//! Wire types and endpoint paths shared by the server and the client.

use serde::{Deserialize, Serialize};

pub const LOGIN_PATH: &str = "/auth/login";
pub const PROFILE_PATH: &str = "/auth/profile";
pub const ACCOUNTS_PATH: &str = "/auth/accounts";
pub const REFRESH_PATH: &str = "/refresh-token";

/// Subject role carried in access tokens and profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Student,
    User,
}

/// Non-sensitive projection of a subject. Safe to persist on the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub name: String,
}

/// Body of `POST /auth/login`. Missing fields deserialize as empty strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Body of `POST /refresh-token`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
}

/// Successful login or rotation response.
///
/// Deserialization accepts the older `token` / snake_case spellings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    #[serde(default, alias = "token", alias = "access_token")]
    pub access_token: String,
    #[serde(
        default,
        alias = "refresh_token",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "profile", skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

/// Entry of the `GET /auth/accounts` demo listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Error body returned by every rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
