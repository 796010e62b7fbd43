use crate::core::client::database::DatabaseError;

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl HealthError {
    pub fn is_transient(&self) -> bool {
        match self {
            HealthError::Database(e) => e.is_transient(),
        }
    }
}
