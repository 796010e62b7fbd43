use thiserror::Error;

/// SQLSTATE classes that mean the server could not be reached or dropped us.
const CONNECTION_EXCEPTION_CLASS: &str = "08";
const ADMIN_SHUTDOWN_CODES: &[&str] = &["57P01", "57P02", "57P03"];

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connectivity failure: {0}")]
    Connectivity(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Transaction failed and was rolled back: {0}")]
    Transaction(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Duplicate object: {0}")]
    Duplicate(String),
}

impl DatabaseError {
    /// Only connectivity failures are worth retrying locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, DatabaseError::Connectivity(_))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => DatabaseError::Connectivity(err.to_string()),
            sqlx::Error::RowNotFound => DatabaseError::NotFound(err.to_string()),
            sqlx::Error::Database(db_err) => match db_err.code() {
                Some(code) if code.starts_with(CONNECTION_EXCEPTION_CLASS) => {
                    DatabaseError::Connectivity(err.to_string())
                }
                Some(code) if ADMIN_SHUTDOWN_CODES.contains(&code.as_ref()) => {
                    DatabaseError::Connectivity(err.to_string())
                }
                // duplicate_database / duplicate_object
                Some(code) if code == "42P04" || code == "42710" => DatabaseError::Duplicate(err.to_string()),
                _ => DatabaseError::Query(err.to_string()),
            },
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}
