use thiserror::Error;

use crate::coordinator::CoordinationError;
use crate::core::client::database::DatabaseError;
use crate::core::client::lock::LockError;
use crate::health::HealthError;
use crate::provisioner::ProvisionError;
use crate::schema::MigrationError;

/// Result type for tenantdb operations
pub type TenantDbResult<T> = Result<T, TenantDbError>;

/// Error types for tenantdb
#[derive(Error, Debug)]
pub enum TenantDbError {
    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Health error: {0}")]
    Health(#[from] HealthError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Coordination store error: {0}")]
    Store(#[from] LockError),

    /// Invalid or missing command line / environment configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("tenantdb error: {0}")]
    Other(#[from] anyhow::Error),
}

impl TenantDbError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TenantDbError::Provision(e) => e.is_transient(),
            TenantDbError::Migration(e) => e.is_transient(),
            TenantDbError::Coordination(e) => e.is_transient(),
            TenantDbError::Health(e) => e.is_transient(),
            TenantDbError::Database(e) => e.is_transient(),
            TenantDbError::Store(e) => e.is_transient(),
            TenantDbError::ConfigError(_) | TenantDbError::Other(_) => false,
        }
    }

    /// Stable machine readable category, used in command output.
    pub fn kind(&self) -> &'static str {
        match self {
            TenantDbError::Provision(ProvisionError::Conflict { .. }) => "provisioning_conflict",
            TenantDbError::Provision(ProvisionError::InvalidTenantId(_)) => "invalid_tenant_id",
            TenantDbError::Migration(MigrationError::IntegrityCheckFailed(_)) => "integrity_failure",
            TenantDbError::Coordination(CoordinationError::LockContention { .. }) => "lock_contention",
            TenantDbError::Coordination(CoordinationError::LockOwnershipLost { .. }) => "lock_ownership_lost",
            TenantDbError::Coordination(CoordinationError::FinalizeIncomplete { .. }) => "finalize_incomplete",
            TenantDbError::ConfigError(_) => "configuration",
            e if e.is_transient() => "connectivity_failure",
            TenantDbError::Provision(_) => "provisioning",
            TenantDbError::Migration(_) => "migration",
            TenantDbError::Coordination(_) | TenantDbError::Store(_) => "coordination",
            TenantDbError::Health(_) | TenantDbError::Database(_) => "database",
            TenantDbError::Other(_) => "other",
        }
    }
}
