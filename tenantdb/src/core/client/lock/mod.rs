pub mod constant;
pub mod error;
pub mod memory;
pub mod mongodb;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
pub use error::LockError;

/// Shared key/value coordination store.
///
/// These primitives are all the lock coordinator needs; any store offering them with TTL
/// support can back it. Every method is a single atomic operation on the store side.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Sets `key` to `value` only if no live value exists. Returns whether the key was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Deletes `key` only if it currently holds `expected`. Returns whether it was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, LockError>;

    /// Live value of an expiring key.
    async fn get(&self, key: &str) -> Result<Option<String>, LockError>;

    async fn hash_get(&self, hash: &str, field: &str) -> Result<Option<String>, LockError>;

    async fn hash_get_all(&self, hash: &str) -> Result<HashMap<String, String>, LockError>;

    async fn hash_set(&self, hash: &str, field: &str, value: &str) -> Result<(), LockError>;

    /// Returns whether the field existed.
    async fn hash_delete(&self, hash: &str, field: &str) -> Result<bool, LockError>;

    /// Live expiring keys and hash names starting with `prefix`, sorted.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, LockError>;
}
