use crate::core::client::database::DatabaseError;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Unknown revision '{0}'")]
    UnknownRevision(String),

    #[error("Invalid migration registry: {0}")]
    InvalidRegistry(String),

    #[error("Database is at revision '{current}' which this build does not know. Upgrade the binary.")]
    DatabaseNewer { current: String },

    #[error("Target revision '{target}' is behind current revision '{current}', use an explicit rollback")]
    TargetBehindCurrent { current: String, target: String },

    #[error("Target revision '{target}' is ahead of current revision '{current}', migrate instead")]
    TargetAheadOfCurrent { current: String, target: String },

    #[error("Migration '{revision}' expects parent {expected:?} but the database is at {current:?}")]
    RevisionMismatch { revision: String, expected: Option<String>, current: Option<String> },

    #[error("Database has no schema revision, nothing to roll back")]
    NotInitialized,

    #[error("Migration '{revision}' failed: {message} (already committed: {committed:?})")]
    MigrationStepFailed { revision: String, message: String, committed: Vec<String> },

    #[error("Rollback of '{revision}' failed: {message} (already rolled back: {rolled_back:?})")]
    RollbackStepFailed { revision: String, message: String, rolled_back: Vec<String> },

    #[error("Schema integrity check failed: {0}")]
    IntegrityCheckFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl MigrationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MigrationError::Database(e) if e.is_transient())
    }

    /// Revisions that were committed before the failure, if any.
    pub fn committed(&self) -> &[String] {
        match self {
            MigrationError::MigrationStepFailed { committed, .. } => committed,
            MigrationError::RollbackStepFailed { rolled_back, .. } => rolled_back,
            _ => &[],
        }
    }
}
