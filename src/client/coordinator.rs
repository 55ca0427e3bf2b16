//! Single-flight token renewal.
//!
//! However many requests hit a 401 at once, only one renewal call is in
//! flight. The first caller spawns it and parks a shared handle in the slot;
//! everyone else awaits a clone of that handle. The spawned task clears the
//! slot once it settles, so the next expiry starts a fresh renewal.

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, info, warn};

use super::ClientError;
use super::context::{SESSION_EXPIRED_MESSAGE, SessionContext};
use super::renewal::Renewer;

type RenewalHandle = Shared<BoxFuture<'static, Result<String, ClientError>>>;

pub struct RefreshCoordinator {
    context: Arc<SessionContext>,
    renewer: Arc<dyn Renewer>,
    in_flight: Arc<Mutex<Option<RenewalHandle>>>,
}

impl RefreshCoordinator {
    pub fn new(context: Arc<SessionContext>, renewer: Arc<dyn Renewer>) -> Self {
        Self {
            context,
            renewer,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether a renewal is currently running.
    pub fn is_renewing(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Renew the access token, joining a renewal already in flight.
    /// Returns the new access token.
    pub async fn ensure_refreshed(&self) -> Result<String, ClientError> {
        self.join_or_start(None).await
    }

    /// Renew after the server refused `rejected`. If a renewal already
    /// replaced that token, the newer token is returned without another call.
    pub async fn refresh_rejected(&self, rejected: Option<&str>) -> Result<String, ClientError> {
        self.join_or_start(Some(rejected)).await
    }

    async fn join_or_start(&self, rejected: Option<Option<&str>>) -> Result<String, ClientError> {
        let handle = {
            let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(handle) => {
                    debug!("Joining in-flight renewal");
                    handle.clone()
                }
                None => {
                    // A finished renewal stores its token before clearing the slot.
                    if let (Some(rejected), Some(current)) =
                        (rejected, self.context.cache.access_token())
                    {
                        if rejected != Some(current.as_str()) {
                            debug!("Rejected token already replaced");
                            return Ok(current);
                        }
                    }
                    let handle = self.start_renewal();
                    *slot = Some(handle.clone());
                    handle
                }
            }
        };

        handle.await
    }

    /// Must be called with the slot locked: the task clears the slot under
    /// the same lock, so it cannot run before the handle is stored.
    fn start_renewal(&self) -> RenewalHandle {
        let context = self.context.clone();
        let renewer = self.renewer.clone();
        let slot = self.in_flight.clone();

        let task = tokio::spawn(async move {
            // Dropped on completion, panic or abort alike.
            let _clear = ClearSlot(slot);
            renew(&context, renewer.as_ref()).await
        });

        async move { task.await.unwrap_or(Err(ClientError::RenewalAborted)) }
            .boxed()
            .shared()
    }
}

/// Empties the in-flight slot when the renewal task ends.
struct ClearSlot(Arc<Mutex<Option<RenewalHandle>>>);

impl Drop for ClearSlot {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

async fn renew(context: &SessionContext, renewer: &dyn Renewer) -> Result<String, ClientError> {
    let started_at = context.generation();
    match exchange(context, renewer, started_at).await {
        Ok(access_token) => Ok(access_token),
        Err(e) => {
            warn!(error = %e, "Token renewal failed");
            context.logout_if_current(started_at, Some(SESSION_EXPIRED_MESSAGE));
            Err(e)
        }
    }
}

async fn exchange(
    context: &SessionContext,
    renewer: &dyn Renewer,
    started_at: u64,
) -> Result<String, ClientError> {
    let current = context
        .cache
        .refresh_token()?
        .ok_or(ClientError::MissingRefreshToken)?;

    let response = renewer.renew(&current).await?;

    if response.access_token.is_empty() {
        return Err(ClientError::InvalidResponse(
            "renewal response has no access token".to_string(),
        ));
    }

    let refresh_token = response
        .refresh_token
        .filter(|t| !t.is_empty())
        .unwrap_or(current);

    let profile = response
        .user
        .or_else(|| context.cache.profile())
        .ok_or_else(|| {
            ClientError::InvalidResponse("renewal response has no profile".to_string())
        })?;

    context.establish_renewed(started_at, &response.access_token, &refresh_token, profile)?;

    info!("Access token renewed");
    Ok(response.access_token)
}
