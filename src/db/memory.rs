//! In-memory refresh store. Default backing and the one tests use.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{RefreshEntry, RefreshStore, StoreError};

#[derive(Default)]
pub struct MemoryRefreshStore {
    entries: Mutex<HashMap<String, RefreshEntry>>,
}

impl MemoryRefreshStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, RefreshEntry>>, StoreError> {
        self.entries.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl RefreshStore for MemoryRefreshStore {
    async fn insert(&self, token: &str, entry: RefreshEntry) -> Result<(), StoreError> {
        self.entries()?.insert(token.to_string(), entry);
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<RefreshEntry>, StoreError> {
        Ok(self.entries()?.get(token).cloned())
    }

    async fn remove(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.entries()?.remove(token).is_some())
    }

    async fn sweep_expired(&self, now: u64) -> Result<u64, StoreError> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at >= now);
        Ok((before - entries.len()) as u64)
    }

    async fn len(&self) -> Result<u64, StoreError> {
        Ok(self.entries()?.len() as u64)
    }
}
