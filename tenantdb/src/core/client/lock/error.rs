use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Coordination store unreachable: {0}")]
    Connectivity(String),

    #[error("Coordination store error: {0}")]
    Store(String),

    #[error("Failed to (de)serialize coordination value for key {key}: {message}")]
    Serialization { key: String, message: String },
}

impl LockError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LockError::Connectivity(_))
    }
}

impl From<mongodb::error::Error> for LockError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match err.kind.as_ref() {
            ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. } => {
                LockError::Connectivity(err.to_string())
            }
            _ => LockError::Store(err.to_string()),
        }
    }
}
