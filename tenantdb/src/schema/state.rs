use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;

/// Lifecycle of one database's schema as seen by this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchemaState {
    Uninitialized,
    Initializing,
    AtRevision { revision: String },
    Migrating { from: Option<String>, to: String },
    /// Left only by a successful migration or an explicit rollback.
    Failed { revision: String, reason: String },
}

/// Per database [`SchemaState`], keyed by database name.
#[derive(Debug, Default)]
pub struct SchemaStateTracker {
    states: RwLock<HashMap<String, SchemaState>>,
}

impl SchemaStateTracker {
    pub fn get(&self, database: &str) -> SchemaState {
        // a poisoned lock only means a writer panicked mid insert, the map itself is intact
        let states = self.states.read().unwrap_or_else(|e| e.into_inner());
        states.get(database).cloned().unwrap_or(SchemaState::Uninitialized)
    }

    pub fn set(&self, database: &str, state: SchemaState) {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        states.insert(database.to_string(), state);
    }
}
