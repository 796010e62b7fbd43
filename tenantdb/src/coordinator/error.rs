use std::collections::BTreeMap;

use crate::core::client::lock::LockError;

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("Platform '{platform}' is locked by another holder")]
    LockContention { platform: String },

    #[error("Coordinated migration {migration_id} lost lock ownership of {platforms:?}")]
    LockOwnershipLost { migration_id: String, platforms: Vec<String> },

    /// The record was finalized, but store writes failed for some platforms.
    #[error("Coordinated migration {migration_id} finalized with store failures {failures:?} (foreign locks: {lost:?})")]
    FinalizeIncomplete { migration_id: String, failures: BTreeMap<String, String>, lost: Vec<String> },

    #[error("Unknown coordinated migration {0}")]
    UnknownMigration(String),

    #[error("Coordinated migration {0} was already finalized")]
    AlreadyFinalized(String),

    #[error("Invalid coordination request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] LockError),
}

impl CoordinationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinationError::Store(e) if e.is_transient())
    }
}
