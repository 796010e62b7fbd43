use std::sync::Arc;

use chrono::Utc;

use crate::core::client::lock::constant::BACKUPS_PREFIX;
use crate::core::client::lock::{CoordinationStore, LockError};
use crate::types::version::BackupCheckpoint;

/// Records backup checkpoints (metadata only) in the coordination store.
pub struct BackupLedger {
    store: Arc<dyn CoordinationStore>,
}

impl BackupLedger {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    fn hash_name(platform: &str) -> String {
        format!("{}{}", BACKUPS_PREFIX, platform)
    }

    pub async fn record(
        &self,
        platform: &str,
        target_revision: &str,
        current_revision: Option<&str>,
        tables: Vec<String>,
    ) -> Result<BackupCheckpoint, LockError> {
        let timestamp = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let checkpoint = BackupCheckpoint {
            name: format!("backup_{}_{}_{}", platform, timestamp.format("%Y%m%dT%H%M%S%3f"), &suffix[..8]),
            platform: platform.to_string(),
            target_revision: target_revision.to_string(),
            current_revision: current_revision.map(str::to_string),
            timestamp,
            tables,
        };

        let value = serde_json::to_string(&checkpoint)
            .map_err(|e| LockError::Serialization { key: checkpoint.name.clone(), message: e.to_string() })?;
        self.store.hash_set(&Self::hash_name(platform), &checkpoint.name, &value).await?;
        Ok(checkpoint)
    }

    /// Checkpoints of `platform`, newest first.
    pub async fn list_backups(&self, platform: &str) -> Result<Vec<BackupCheckpoint>, LockError> {
        let fields = self.store.hash_get_all(&Self::hash_name(platform)).await?;
        let mut checkpoints = fields
            .into_iter()
            .map(|(name, value)| {
                serde_json::from_str::<BackupCheckpoint>(&value)
                    .map_err(|e| LockError::Serialization { key: name, message: e.to_string() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        checkpoints.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.name.cmp(&a.name)));
        Ok(checkpoints)
    }

    pub async fn count(&self, platform: &str) -> Result<usize, LockError> {
        Ok(self.store.hash_get_all(&Self::hash_name(platform)).await?.len())
    }
}
