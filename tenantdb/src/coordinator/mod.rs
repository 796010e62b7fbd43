//! Distributed locks and the cross-platform schema version registry.
//!
//! All shared state lives in a [`CoordinationStore`]. A lock is an expiring key set only if absent and
//! released only by compare-and-delete against the holder's token. Version pointers and history are
//! hash fields. Pointer updates are not part of any database transaction, so a database may run ahead
//! of its pointer for a while; [`LockCoordinator::check_consistency`] surfaces such gaps.

pub mod error;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

pub use error::CoordinationError;

use crate::core::client::lock::constant::{
    COORDINATION_HASH, LOCK_KEY_PREFIX, VERSION_HISTORY_PREFIX, VERSION_POINTERS_HASH,
};
use crate::core::client::lock::{CoordinationStore, LockError};
use crate::types::version::{
    ConsistencyReport, CoordinationRecord, CoordinationStatus, LockToken, MismatchGroup, SchemaVersionEntry,
};

fn lock_key(platform: &str) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, platform)
}

fn history_hash(platform: &str) -> String {
    format!("{}{}", VERSION_HISTORY_PREFIX, platform)
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, LockError> {
    serde_json::to_string(value).map_err(|e| LockError::Serialization { key: key.to_string(), message: e.to_string() })
}

fn decode<T: DeserializeOwned>(key: &str, value: &str) -> Result<T, LockError> {
    serde_json::from_str(value).map_err(|e| LockError::Serialization { key: key.to_string(), message: e.to_string() })
}

pub struct LockCoordinator {
    store: Arc<dyn CoordinationStore>,
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        self.store.clone()
    }

    /// Takes the platform's lock for `timeout`. `None` means someone else holds it; callers back off,
    /// this is never retried here.
    pub async fn acquire_lock(&self, platform: &str, timeout: Duration) -> Result<Option<LockToken>, CoordinationError> {
        let token = LockToken::generate();
        if self.store.set_if_absent(&lock_key(platform), token.as_str(), timeout).await? {
            debug!(platform, ttl_secs = timeout.as_secs(), "🔒 Lock acquired");
            Ok(Some(token))
        } else {
            debug!(platform, "Lock already held");
            Ok(None)
        }
    }

    /// Releases the lock only if `token` still owns it. Returns `false` otherwise.
    pub async fn release_lock(&self, platform: &str, token: &LockToken) -> Result<bool, CoordinationError> {
        let released = self.store.compare_and_delete(&lock_key(platform), token.as_str()).await?;
        if released {
            debug!(platform, "🔓 Lock released");
        } else {
            warn!(platform, token = ?token, "Lock not released, caller is no longer the owner");
        }
        Ok(released)
    }

    pub async fn is_locked(&self, platform: &str) -> Result<bool, CoordinationError> {
        Ok(self.store.get(&lock_key(platform)).await?.is_some())
    }

    /// Platforms whose lock is currently held.
    pub async fn active_locks(&self) -> Result<Vec<String>, CoordinationError> {
        let keys = self.store.keys_with_prefix(LOCK_KEY_PREFIX).await?;
        Ok(keys.into_iter().filter_map(|key| key.strip_prefix(LOCK_KEY_PREFIX).map(str::to_string)).collect())
    }

    /// Appends a history entry, then moves the platform's current pointer to it.
    pub async fn register_version(
        &self,
        platform: &str,
        version: &str,
        metadata: serde_json::Value,
    ) -> Result<SchemaVersionEntry, CoordinationError> {
        let entry = SchemaVersionEntry {
            platform: platform.to_string(),
            version: version.to_string(),
            timestamp: Utc::now(),
            metadata,
        };
        let value = encode(platform, &entry)?;

        // Field names sort in insertion order.
        let nanos = entry.timestamp.timestamp_nanos_opt().unwrap_or_default();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let field = format!("{:020}-{}", nanos, &suffix[..8]);
        self.store.hash_set(&history_hash(platform), &field, &value).await?;
        self.store.hash_set(VERSION_POINTERS_HASH, platform, &value).await?;

        info!(platform, version, "📌 Schema version registered");
        Ok(entry)
    }

    pub async fn get_version(&self, platform: &str) -> Result<Option<SchemaVersionEntry>, CoordinationError> {
        match self.store.hash_get(VERSION_POINTERS_HASH, platform).await? {
            Some(value) => Ok(Some(decode(platform, &value)?)),
            None => Ok(None),
        }
    }

    pub async fn get_all_versions(&self) -> Result<BTreeMap<String, SchemaVersionEntry>, CoordinationError> {
        let pointers = self.store.hash_get_all(VERSION_POINTERS_HASH).await?;
        let mut versions = BTreeMap::new();
        for (platform, value) in pointers {
            let entry = decode(&platform, &value)?;
            versions.insert(platform, entry);
        }
        Ok(versions)
    }

    /// Every version ever registered for `platform`, oldest first.
    pub async fn get_version_history(&self, platform: &str) -> Result<Vec<SchemaVersionEntry>, CoordinationError> {
        let fields = self.store.hash_get_all(&history_hash(platform)).await?;
        let mut fields: Vec<_> = fields.into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        let history = fields
            .into_iter()
            .map(|(field, value)| decode(&field, &value))
            .collect::<Result<Vec<SchemaVersionEntry>, _>>()?;
        Ok(history)
    }

    /// Groups platform pointers by version.
    ///
    /// The largest group is the reference (ties go to the greatest version string); every other group
    /// is a mismatch. Nothing is corrected.
    pub async fn check_consistency(&self) -> Result<ConsistencyReport, CoordinationError> {
        let versions = self.get_all_versions().await?;

        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (platform, entry) in versions {
            groups.entry(entry.version).or_default().push(platform);
        }
        for platforms in groups.values_mut() {
            platforms.sort();
        }

        let reference_version =
            groups.iter().max_by(|a, b| a.1.len().cmp(&b.1.len()).then_with(|| a.0.cmp(b.0))).map(|(v, _)| v.clone());

        let mismatches: Vec<MismatchGroup> = groups
            .iter()
            .filter(|(version, _)| Some(*version) != reference_version.as_ref())
            .map(|(version, platforms)| MismatchGroup { version: version.clone(), platforms: platforms.clone() })
            .collect();

        if !mismatches.is_empty() {
            warn!(
                reference = reference_version.as_deref().unwrap_or_default(),
                mismatched_versions = mismatches.len(),
                "⚠️  Platforms disagree on schema version"
            );
        }

        Ok(ConsistencyReport { groups, reference_version, mismatches, checked_at: Utc::now() })
    }

    /// Locks every platform in order or none of them.
    ///
    /// On the first platform that cannot be locked, every lock taken by this call is released and
    /// [`CoordinationError::LockContention`] is returned. On success the record, with each lock token,
    /// is persisted for [`Self::finalize_coordinated_migration`].
    pub async fn coordinate_multi_platform_migration(
        &self,
        target_version: &str,
        platforms: &[String],
        timeout: Duration,
    ) -> Result<CoordinationRecord, CoordinationError> {
        let mut seen = HashSet::new();
        let platforms: Vec<String> = platforms.iter().filter(|p| seen.insert(p.as_str())).cloned().collect();
        if platforms.is_empty() {
            return Err(CoordinationError::InvalidRequest("no platforms given".to_string()));
        }

        let mut acquired: Vec<(String, LockToken)> = Vec::with_capacity(platforms.len());
        for platform in &platforms {
            match self.acquire_lock(platform, timeout).await {
                Ok(Some(token)) => acquired.push((platform.clone(), token)),
                Ok(None) => {
                    warn!(platform = %platform, target_version, "Coordinated migration aborted, platform is locked");
                    self.release_all(&acquired).await;
                    return Err(CoordinationError::LockContention { platform: platform.clone() });
                }
                Err(e) => {
                    self.release_all(&acquired).await;
                    return Err(e);
                }
            }
        }

        let record = CoordinationRecord {
            migration_id: uuid::Uuid::new_v4().to_string(),
            target_version: target_version.to_string(),
            platforms,
            tokens: acquired.iter().cloned().collect(),
            status: CoordinationStatus::Coordinated,
            created_at: Utc::now(),
            finalized_at: None,
            results: BTreeMap::new(),
            registry_failures: BTreeMap::new(),
        };

        if let Err(e) = self.save_record(&record).await {
            self.release_all(&acquired).await;
            return Err(e);
        }

        info!(
            migration_id = %record.migration_id,
            target_version,
            platforms = ?record.platforms,
            "🤝 Coordinated migration admitted"
        );
        Ok(record)
    }

    /// Releases every platform lock of the record by its stored token and advances the pointer of each
    /// platform reported successful.
    ///
    /// All platforms are processed even when some locks are no longer owned or a store write fails. The
    /// final record is saved first; then store failures are reported as
    /// [`CoordinationError::FinalizeIncomplete`] and foreign locks as [`CoordinationError::LockOwnershipLost`].
    pub async fn finalize_coordinated_migration(
        &self,
        migration_id: &str,
        platform_results: &BTreeMap<String, bool>,
    ) -> Result<CoordinationRecord, CoordinationError> {
        let mut record = self
            .get_coordination_record(migration_id)
            .await?
            .ok_or_else(|| CoordinationError::UnknownMigration(migration_id.to_string()))?;
        if record.status != CoordinationStatus::Coordinated {
            return Err(CoordinationError::AlreadyFinalized(migration_id.to_string()));
        }

        let mut lost = Vec::new();
        let mut failures = BTreeMap::new();
        for platform in &record.platforms {
            match record.tokens.get(platform) {
                Some(token) => match self.release_lock(platform, token).await {
                    Ok(true) => {}
                    Ok(false) => lost.push(platform.clone()),
                    Err(e) => {
                        warn!(migration_id, platform = %platform, error = %e, "Failed to release lock, it will expire with its TTL");
                        failures.insert(platform.clone(), format!("release failed: {}", e));
                    }
                },
                None => lost.push(platform.clone()),
            }

            let mut succeeded = platform_results.get(platform).copied().unwrap_or(false);
            if succeeded {
                let metadata = serde_json::json!({ "migration_id": migration_id });
                if let Err(e) = self.register_version(platform, &record.target_version, metadata).await {
                    warn!(migration_id, platform = %platform, error = %e, "Failed to register version");
                    record.registry_failures.insert(platform.clone(), e.to_string());
                    failures.insert(platform.clone(), format!("version registration failed: {}", e));
                    succeeded = false;
                }
            }
            record.results.insert(platform.clone(), succeeded);
        }

        let succeeded = record.results.values().filter(|ok| **ok).count();
        record.status = if succeeded == record.platforms.len() {
            CoordinationStatus::Completed
        } else if succeeded == 0 {
            CoordinationStatus::Failed
        } else {
            CoordinationStatus::PartiallyCompleted
        };
        record.finalized_at = Some(Utc::now());
        self.save_record(&record).await?;

        info!(migration_id, status = %record.status, succeeded, "Coordinated migration finalized");

        if !failures.is_empty() {
            return Err(CoordinationError::FinalizeIncomplete { migration_id: migration_id.to_string(), failures, lost });
        }
        if !lost.is_empty() {
            warn!(migration_id, platforms = ?lost, "Locks were not owned by this migration anymore");
            return Err(CoordinationError::LockOwnershipLost { migration_id: migration_id.to_string(), platforms: lost });
        }
        Ok(record)
    }

    pub async fn get_coordination_record(
        &self,
        migration_id: &str,
    ) -> Result<Option<CoordinationRecord>, CoordinationError> {
        match self.store.hash_get(COORDINATION_HASH, migration_id).await? {
            Some(value) => Ok(Some(decode(migration_id, &value)?)),
            None => Ok(None),
        }
    }

    async fn save_record(&self, record: &CoordinationRecord) -> Result<(), CoordinationError> {
        let value = encode(&record.migration_id, record)?;
        self.store.hash_set(COORDINATION_HASH, &record.migration_id, &value).await?;
        Ok(())
    }

    async fn release_all(&self, acquired: &[(String, LockToken)]) {
        for (platform, token) in acquired {
            if let Err(e) = self.release_lock(platform, token).await {
                warn!(platform = %platform, error = %e, "Failed to release lock, it will expire with its TTL");
            }
        }
    }
}
