//! Bearer token authentication.
//!
//! Access tokens are short-lived and stateless. Refresh tokens are tracked
//! in the refresh store and consumed on every rotation.

mod errors;
mod extractors;
mod header;
mod ip;
mod state;

pub use errors::AuthError;
pub use extractors::BearerAuth;
pub use header::{authorization, bearer_value};
pub use ip::client_ip;
pub use state::HasTokenService;
