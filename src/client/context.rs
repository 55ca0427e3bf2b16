//! Token cache and session signals shared by every client component.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::ClientError;
use super::cache::TokenCache;
use super::signals::{SessionEvent, SessionSignals, SessionStatus};
use super::storage::DurableStorage;
use crate::protocol::UserProfile;

/// Reason shown when a renewal fails.
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please sign in again to continue.";

/// Reason shown when a 401 cannot be recovered by renewal.
pub const NO_ACCESS_MESSAGE: &str = "You no longer have access. Sign in again to continue.";

pub struct SessionContext {
    pub cache: TokenCache,
    pub signals: SessionSignals,
    /// Bumped by every login and logout. A renewal started under an older
    /// generation must not write its result. Held while tokens are written.
    generation: Mutex<u64>,
}

impl SessionContext {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self {
            cache: TokenCache::new(storage),
            signals: SessionSignals::new(),
            generation: Mutex::new(0),
        }
    }

    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current session generation. Read it before starting a renewal.
    pub fn generation(&self) -> u64 {
        *self.lock_generation()
    }

    /// Store a fresh token set from a login and mark the session
    /// authenticated. Any renewal still in flight is superseded.
    pub fn establish(
        &self,
        access_token: &str,
        refresh_token: &str,
        profile: UserProfile,
        event: SessionEvent,
    ) -> Result<(), ClientError> {
        let mut generation = self.lock_generation();
        *generation += 1;
        self.apply(access_token, refresh_token, profile, event)
    }

    /// Store a renewal result, unless a login or logout happened since
    /// `started_at` was read. A superseded result is dropped unwritten.
    pub fn establish_renewed(
        &self,
        started_at: u64,
        access_token: &str,
        refresh_token: &str,
        profile: UserProfile,
    ) -> Result<(), ClientError> {
        let generation = self.lock_generation();
        if *generation != started_at {
            debug!("Discarding renewal superseded by login or logout");
            return Err(ClientError::RenewalAborted);
        }
        self.apply(
            access_token,
            refresh_token,
            profile.clone(),
            SessionEvent::TokenRefreshed(profile),
        )
    }

    /// Durable writes happen before the access token becomes visible, so a
    /// storage failure leaves the session as it was.
    fn apply(
        &self,
        access_token: &str,
        refresh_token: &str,
        profile: UserProfile,
        event: SessionEvent,
    ) -> Result<(), ClientError> {
        self.cache.set_refresh_token(refresh_token)?;
        self.cache.set_profile(&profile)?;
        self.cache.set_access_token(access_token);
        self.signals.set_authenticated(profile);
        self.signals.publish(event);
        Ok(())
    }

    /// Clear every token and move to `Anonymous`. Safe to call repeatedly
    /// and from several places at once; `LoggedOut` is published only when
    /// an authenticated session actually ends.
    pub fn logout_cascade(&self, reason: Option<&str>) {
        let mut generation = self.lock_generation();
        *generation += 1;
        self.clear(reason);
    }

    /// Log out only if the session is still the one from `started_at`.
    /// Returns whether the logout ran.
    pub fn logout_if_current(&self, started_at: u64, reason: Option<&str>) -> bool {
        let mut generation = self.lock_generation();
        if *generation != started_at {
            return false;
        }
        *generation += 1;
        self.clear(reason);
        true
    }

    fn clear(&self, reason: Option<&str>) {
        self.cache.clear_all();

        let reason = reason.map(str::to_string);
        let previous = self.signals.set_anonymous(reason.clone());
        if previous == SessionStatus::Authenticated {
            info!(reason = ?reason, "Session ended");
            self.signals.publish(SessionEvent::LoggedOut { reason });
        } else if previous == SessionStatus::Initializing {
            info!("No session to restore");
        }
    }

    /// Record a display reason without touching tokens.
    pub fn record_reason(&self, reason: &str) {
        warn!(reason = %reason, "Session request rejected");
        self.signals.set_reason(Some(reason.to_string()));
    }
}
