//! Client token cache.
//!
//! The access token lives only in process memory. The refresh token and the
//! profile projection live in [`DurableStorage`] so a session survives a
//! restart. The access token is never written durably.

use std::sync::{Arc, RwLock};

use tracing::warn;

use super::ClientError;
use super::storage::DurableStorage;
use crate::protocol::UserProfile;

pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const PROFILE_KEY: &str = "user";
/// Durable key older clients used for the access token. Purged on startup.
pub const LEGACY_ACCESS_TOKEN_KEY: &str = "token";

pub struct TokenCache {
    access: RwLock<Option<String>>,
    storage: Arc<dyn DurableStorage>,
}

impl TokenCache {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        if let Err(e) = storage.remove(LEGACY_ACCESS_TOKEN_KEY) {
            warn!(error = %e, "Failed to purge legacy access token");
        }
        Self {
            access: RwLock::new(None),
            storage,
        }
    }

    pub fn storage(&self) -> &Arc<dyn DurableStorage> {
        &self.storage
    }

    pub fn access_token(&self) -> Option<String> {
        self.access
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// An empty value clears the cached token.
    pub fn set_access_token(&self, token: &str) {
        let mut access = self.access.write().unwrap_or_else(|e| e.into_inner());
        *access = if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        };
    }

    pub fn clear_access_token(&self) {
        self.set_access_token("");
    }

    pub fn refresh_token(&self) -> Result<Option<String>, ClientError> {
        Ok(self
            .storage
            .get(REFRESH_TOKEN_KEY)?
            .filter(|t| !t.is_empty()))
    }

    /// Whether a refresh token is stored. Storage errors count as absent.
    pub fn has_refresh_token(&self) -> bool {
        matches!(self.refresh_token(), Ok(Some(_)))
    }

    /// An empty value is ignored and leaves the stored token in place.
    pub fn set_refresh_token(&self, token: &str) -> Result<(), ClientError> {
        if token.is_empty() {
            return Ok(());
        }
        self.storage.set(REFRESH_TOKEN_KEY, token)
    }

    /// Stored profile. An unreadable entry is removed and reported as absent.
    pub fn profile(&self) -> Option<UserProfile> {
        let raw = match self.storage.get(PROFILE_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read stored profile");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(error = %e, "Discarding corrupted stored profile");
                if let Err(e) = self.storage.remove(PROFILE_KEY) {
                    warn!(error = %e, "Failed to remove corrupted profile");
                }
                None
            }
        }
    }

    pub fn set_profile(&self, profile: &UserProfile) -> Result<(), ClientError> {
        let json = serde_json::to_string(profile)
            .map_err(|e| ClientError::Storage(format!("Failed to encode profile: {}", e)))?;
        self.storage.set(PROFILE_KEY, &json)
    }

    /// Wipe memory and every durable session entry. Best effort: a failing
    /// key is logged and the rest are still removed.
    pub fn clear_all(&self) {
        self.clear_access_token();
        for key in [REFRESH_TOKEN_KEY, PROFILE_KEY, LEGACY_ACCESS_TOKEN_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!(key = key, error = %e, "Failed to clear session entry");
            }
        }
    }
}
