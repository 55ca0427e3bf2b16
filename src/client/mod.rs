//! Client side of the token pair protocol.
//!
//! [`SessionManager`] owns a session: it logs in, restores a stored session
//! on startup, and hands out an [`AuthorizedClient`] whose requests renew
//! the access token transparently. Renewal is single-flight across every
//! concurrent request, and an unrecoverable 401 ends the session.

mod cache;
mod context;
mod coordinator;
mod error;
mod interceptor;
mod renewal;
mod session;
mod signals;
mod storage;

pub use cache::{LEGACY_ACCESS_TOKEN_KEY, PROFILE_KEY, REFRESH_TOKEN_KEY, TokenCache};
pub use context::{NO_ACCESS_MESSAGE, SESSION_EXPIRED_MESSAGE, SessionContext};
pub use coordinator::RefreshCoordinator;
pub use error::ClientError;
pub use interceptor::{ApiRequest, AuthorizedClient, Disposition, classify};
pub use renewal::{HttpRenewer, Renewer};
pub use session::{ClientConfig, DEFAULT_TIMEOUT, SessionManager};
pub use signals::{SessionEvent, SessionSignals, SessionState, SessionStatus};
pub use storage::{DurableStorage, FileStorage, MemoryStorage};
