//! Client IP extraction.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};

/// Peer IP from `ConnectInfo`. `None` when the router was not served with
/// connect info, as in `oneshot` tests.
pub fn client_ip<B>(request: &Request<B>) -> Option<String> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
}
