//! Session state and event channels.
//!
//! State is a `watch` so late subscribers see the current value. Transitions
//! are also broadcast as [`SessionEvent`]s for consumers that invalidate
//! cached data on login, renewal or logout.

use tokio::sync::{broadcast, watch};

use crate::protocol::UserProfile;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Authenticated,
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub status: SessionStatus,
    pub profile: Option<UserProfile>,
    /// Message to show the user, e.g. why the session ended.
    pub reason: Option<String>,
}

impl SessionState {
    fn initial() -> Self {
        Self {
            status: SessionStatus::Initializing,
            profile: None,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn(UserProfile),
    TokenRefreshed(UserProfile),
    LoggedOut { reason: Option<String> },
}

pub struct SessionSignals {
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSignals {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::initial());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { state, events }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_authenticated(&self, profile: UserProfile) {
        self.state.send_replace(SessionState {
            status: SessionStatus::Authenticated,
            profile: Some(profile),
            reason: None,
        });
    }

    /// Replace the displayed reason without changing status.
    pub fn set_reason(&self, reason: Option<String>) {
        self.state.send_if_modified(|state| {
            if state.reason == reason {
                return false;
            }
            state.reason = reason;
            true
        });
    }

    /// Update the profile of an authenticated session.
    pub fn set_profile(&self, profile: UserProfile) {
        self.state.send_if_modified(|state| {
            if state.status != SessionStatus::Authenticated
                || state.profile.as_ref() == Some(&profile)
            {
                return false;
            }
            state.profile = Some(profile);
            true
        });
    }

    /// Move to `Anonymous`. Returns the status held before the call.
    pub fn set_anonymous(&self, reason: Option<String>) -> SessionStatus {
        let mut previous = SessionStatus::Anonymous;
        self.state.send_if_modified(|state| {
            previous = state.status;
            let next = SessionState {
                status: SessionStatus::Anonymous,
                profile: None,
                reason,
            };
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Role;

    fn profile() -> UserProfile {
        UserProfile {
            id: "2".to_string(),
            email: "student@example.com".to_string(),
            role: Role::Student,
            name: "Student User".to_string(),
        }
    }

    #[test]
    fn test_starts_initializing() {
        let signals = SessionSignals::new();
        assert_eq!(signals.status(), SessionStatus::Initializing);
        assert!(signals.state().profile.is_none());
    }

    #[test]
    fn test_set_anonymous_reports_previous() {
        let signals = SessionSignals::new();
        signals.set_authenticated(profile());

        assert_eq!(
            signals.set_anonymous(Some("bye".into())),
            SessionStatus::Authenticated
        );
        assert_eq!(
            signals.set_anonymous(Some("bye".into())),
            SessionStatus::Anonymous
        );
        assert_eq!(signals.state().reason.as_deref(), Some("bye"));
        assert!(signals.state().profile.is_none());
    }

    #[tokio::test]
    async fn test_watch_sees_changes() {
        let signals = SessionSignals::new();
        let mut rx = signals.subscribe();

        signals.set_authenticated(profile());
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, SessionStatus::Authenticated);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let signals = SessionSignals::new();
        signals.publish(SessionEvent::LoggedOut { reason: None });

        let mut rx = signals.events();
        signals.publish(SessionEvent::LoggedIn(profile()));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::LoggedIn(profile()));
    }
}
