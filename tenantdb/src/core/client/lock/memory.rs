use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CoordinationStore, LockError};

#[derive(Default)]
struct MemoryState {
    keys: HashMap<String, (String, Instant)>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl MemoryState {
    fn live_value(&mut self, key: &str) -> Option<&String> {
        let expired = matches!(self.keys.get(key), Some((_, expires_at)) if *expires_at <= Instant::now());
        if expired {
            self.keys.remove(key);
        }
        self.keys.get(key).map(|(value, _)| value)
    }
}

/// Process local coordination store.
///
/// Only provides mutual exclusion between callers sharing this instance, use it for
/// single process deployments and development.
#[derive(Default)]
pub struct MemoryCoordinationStore {
    state: Mutex<MemoryState>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut state = self.state.lock().await;
        if state.live_value(key).is_some() {
            return Ok(false);
        }
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| LockError::Store(format!("lock ttl of {}s is out of range", ttl.as_secs())))?;
        state.keys.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, LockError> {
        let mut state = self.state.lock().await;
        let owned = state.live_value(key).is_some_and(|current| current == expected);
        if owned {
            state.keys.remove(key);
        }
        Ok(owned)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, LockError> {
        let mut state = self.state.lock().await;
        Ok(state.live_value(key).cloned())
    }

    async fn hash_get(&self, hash: &str, field: &str) -> Result<Option<String>, LockError> {
        let state = self.state.lock().await;
        Ok(state.hashes.get(hash).and_then(|fields| fields.get(field)).cloned())
    }

    async fn hash_get_all(&self, hash: &str) -> Result<HashMap<String, String>, LockError> {
        let state = self.state.lock().await;
        Ok(state.hashes.get(hash).cloned().unwrap_or_default())
    }

    async fn hash_set(&self, hash: &str, field: &str, value: &str) -> Result<(), LockError> {
        let mut state = self.state.lock().await;
        state.hashes.entry(hash.to_string()).or_default().insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_delete(&self, hash: &str, field: &str) -> Result<bool, LockError> {
        let mut state = self.state.lock().await;
        let Some(fields) = state.hashes.get_mut(hash) else {
            return Ok(false);
        };
        let existed = fields.remove(field).is_some();
        if fields.is_empty() {
            state.hashes.remove(hash);
        }
        Ok(existed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, LockError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.keys.retain(|_, (_, expires_at)| *expires_at > now);

        let keys: BTreeSet<String> = state
            .keys
            .keys()
            .chain(state.hashes.keys())
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        Ok(keys.into_iter().collect())
    }
}
