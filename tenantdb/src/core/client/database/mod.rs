pub mod error;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
pub use error::DatabaseError;

use crate::types::health::{CatalogStats, ConnectionMetrics, SizeStats, SlowQuery};
use crate::types::instance::{ConnectionDescriptor, InstanceSummary};

/// Name of the table holding a database's own schema revision.
pub const VERSION_TABLE: &str = "schema_version";

/// Cluster level DDL used to provision tenant databases and roles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    async fn database_exists(&self, database: &str) -> Result<bool, DatabaseError>;

    async fn role_exists(&self, role: &str) -> Result<bool, DatabaseError>;

    async fn create_role(&self, role: &str, password: &str) -> Result<(), DatabaseError>;

    async fn set_role_password(&self, role: &str, password: &str) -> Result<(), DatabaseError>;

    async fn create_database(&self, database: &str, owner: &str, encoding: &str) -> Result<(), DatabaseError>;

    async fn set_database_timezone(&self, database: &str, timezone: &str) -> Result<(), DatabaseError>;

    /// Creates the extensions inside `database` (requires connecting to it).
    async fn create_extensions(&self, database: &str, extensions: &[String]) -> Result<(), DatabaseError>;

    /// Returns the number of terminated backends.
    async fn terminate_sessions(&self, database: &str) -> Result<u64, DatabaseError>;

    /// Drops the database if it exists.
    async fn drop_database(&self, database: &str) -> Result<(), DatabaseError>;

    /// Drops the role if it exists.
    async fn drop_role(&self, role: &str) -> Result<(), DatabaseError>;

    /// Databases whose name starts with `prefix`, with their owning role.
    async fn list_databases(&self, prefix: &str) -> Result<Vec<InstanceSummary>, DatabaseError>;
}

/// SQL access to a single tenant database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TargetDatabase: Send + Sync {
    /// Round trip query, returns the server version string.
    async fn ping(&self) -> Result<String, DatabaseError>;

    /// Runs a script outside of any explicit transaction.
    async fn execute_script(&self, sql: &str) -> Result<(), DatabaseError>;

    /// Runs every statement in one transaction; rolled back as a whole on failure.
    async fn execute_in_transaction(&self, statements: &[String]) -> Result<(), DatabaseError>;

    async fn ensure_version_table(&self) -> Result<(), DatabaseError>;

    async fn current_revision(&self) -> Result<Option<String>, DatabaseError>;

    async fn version_row_count(&self) -> Result<i64, DatabaseError>;

    /// Runs `statements` and replaces the version row with `revision` in one transaction.
    async fn apply_revision(&self, statements: &[String], revision: &str) -> Result<(), DatabaseError>;

    /// User tables of the public schema, sorted.
    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError>;

    async fn catalog_stats(&self) -> Result<CatalogStats, DatabaseError>;

    async fn connection_metrics(&self) -> Result<ConnectionMetrics, DatabaseError>;

    async fn slow_queries(&self, threshold: Duration, limit: i64) -> Result<Vec<SlowQuery>, DatabaseError>;

    async fn size_stats(&self, largest: i64) -> Result<SizeStats, DatabaseError>;
}

/// Hands out clients backed by process wide, lazily created pools.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn TargetDatabase>, DatabaseError>;

    async fn cluster(&self) -> Result<Arc<dyn ClusterAdmin>, DatabaseError>;
}
