use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Opaque proof of lock ownership.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for LockToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for LockToken {
    // Tokens grant release rights, only show a prefix in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "LockToken({}..)", prefix)
    }
}

/// A platform's schema version as recorded in the coordination registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersionEntry {
    pub platform: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Platforms sharing a version that differs from the reference version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MismatchGroup {
    pub version: String,
    pub platforms: Vec<String>,
}

/// Platform version pointers grouped by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// version -> platforms at that version, platforms sorted.
    pub groups: BTreeMap<String, Vec<String>>,
    /// Version held by the largest group, `None` when no platform is registered.
    pub reference_version: Option<String>,
    pub mismatches: Vec<MismatchGroup>,
    pub checked_at: DateTime<Utc>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn platform_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Metadata recorded before a migration attempt. Not restorable data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupCheckpoint {
    pub name: String,
    pub platform: String,
    pub target_revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_revision: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CoordinationStatus {
    Coordinated,
    Completed,
    PartiallyCompleted,
    Failed,
}

/// Persisted state of one coordinated multi-platform migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationRecord {
    pub migration_id: String,
    pub target_version: String,
    pub platforms: Vec<String>,
    /// Token held for each platform, used to release strictly by ownership.
    pub tokens: BTreeMap<String, LockToken>,
    pub status: CoordinationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub results: BTreeMap<String, bool>,
    /// Platforms whose version pointer could not be advanced at finalize, with the store error.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub registry_failures: BTreeMap<String, String>,
}
