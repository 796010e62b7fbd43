use crate::core::client::database::DatabaseError;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Database '{database}' already exists, pass the adopt flag to reuse it")]
    Conflict { database: String },

    #[error("Invalid tenant id '{0}': expected 1-48 characters of [A-Za-z0-9_-]")]
    InvalidTenantId(String),

    #[error("No database '{0}' found for tenant")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl ProvisionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProvisionError::Database(e) if e.is_transient())
    }
}
