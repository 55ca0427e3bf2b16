//! Scheduled sweeping of expired refresh tokens.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::db::RefreshStore;
use crate::jwt::unix_now;

/// Interval between cleanup runs.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Sweep expired entries once. Returns the number removed.
pub async fn run_cleanup(store: &dyn RefreshStore) -> u64 {
    let now = match unix_now() {
        Ok(now) => now,
        Err(e) => {
            error!("Failed to read clock for cleanup: {}", e);
            return 0;
        }
    };

    match store.sweep_expired(now).await {
        Ok(count) => {
            if count > 0 {
                info!("Cleaned up {} expired refresh tokens", count);
            }
            count
        }
        Err(e) => {
            error!("Failed to clean up expired refresh tokens: {}", e);
            0
        }
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    store: Arc<dyn RefreshStore>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;
            run_cleanup(store.as_ref()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryRefreshStore, RefreshEntry};

    fn entry(expires_at: u64) -> RefreshEntry {
        RefreshEntry {
            subject_id: "1".to_string(),
            issued_at: 0,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_run_cleanup_removes_only_expired() {
        let store = MemoryRefreshStore::new();
        let now = unix_now().unwrap();
        store.insert("stale", entry(now - 10)).await.unwrap();
        store.insert("live", entry(now + 600)).await.unwrap();

        assert_eq!(run_cleanup(&store).await, 1);
        assert!(store.get("stale").await.unwrap().is_none());
        assert!(store.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_scheduler_sweeps_on_first_tick() {
        let store = Arc::new(MemoryRefreshStore::new());
        let now = unix_now().unwrap();
        store.insert("stale", entry(now - 10)).await.unwrap();

        let handle = spawn_cleanup_scheduler(store.clone(), Duration::from_millis(10));
        for _ in 0..50 {
            if store.len().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(store.len().await.unwrap(), 0);
    }
}
