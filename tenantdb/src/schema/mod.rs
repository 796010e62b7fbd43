//! Versioned schema migrations for tenant databases.
//!
//! Every tenant database carries its own revision in a single row of the
//! [`VERSION_TABLE`](crate::core::client::database::VERSION_TABLE). A migration's statements and the
//! update of that row commit in the same transaction, so a database is never observed half migrated.
//! Upgrades walk the [`MigrationRegistry`] chain forward one revision at a time; a failure stops the
//! walk and leaves earlier revisions committed. Rollbacks walk the chain backwards using each
//! revision's `down` statements and are never implicit.
//!
//! Before each attempt a [`BackupCheckpoint`](crate::types::version::BackupCheckpoint) is written to
//! the coordination store. It holds metadata only and failing to write it does not block the
//! migration.

pub mod backup;
pub mod error;
pub mod registry;
pub mod revisions;
pub mod state;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

pub use backup::BackupLedger;
pub use error::MigrationError;
pub use registry::{Migration, MigrationRegistry, HEAD};
pub use state::{SchemaState, SchemaStateTracker};

use crate::core::client::database::{DatabaseConnector, TargetDatabase};
use crate::types::instance::DatabaseInstance;
use crate::utils::retry::RetryPolicy;

/// Result of comparing a database's revision with the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationStatus {
    /// No version row yet.
    FreshDatabase { target: String },
    UpToDate { revision: String },
    MigrationRequired { current: String, target: String, pending: Vec<String> },
    /// The version row holds a revision this build does not know.
    DatabaseNewer { current: String },
}

/// Outcome of an upgrade or rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub database: String,
    pub from_revision: Option<String>,
    pub to_revision: String,
    /// Applied revisions in order for upgrades, undone revisions in order for rollbacks.
    pub revisions: Vec<String>,
    pub table_count: usize,
}

/// Read only snapshot of a database's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaInfo {
    pub database: String,
    pub revision: Option<String>,
    pub table_count: usize,
    pub tables: Vec<String>,
    pub state: SchemaState,
}

pub struct SchemaManager {
    connector: Arc<dyn DatabaseConnector>,
    registry: MigrationRegistry,
    backups: Arc<BackupLedger>,
    baseline: String,
    retry: RetryPolicy,
    states: SchemaStateTracker,
}

impl SchemaManager {
    pub fn new(connector: Arc<dyn DatabaseConnector>, registry: MigrationRegistry, backups: Arc<BackupLedger>) -> Self {
        Self {
            connector,
            registry,
            backups,
            baseline: revisions::BASELINE_SCHEMA.to_string(),
            retry: RetryPolicy::default(),
            states: SchemaStateTracker::default(),
        }
    }

    pub fn with_baseline(mut self, baseline: impl Into<String>) -> Self {
        self.baseline = baseline.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn backups(&self) -> &BackupLedger {
        &self.backups
    }

    pub fn state(&self, instance: &DatabaseInstance) -> SchemaState {
        self.states.get(&instance.database_name)
    }

    /// Client for the instance's database, retrying transient connection failures.
    pub async fn connect(&self, instance: &DatabaseInstance) -> Result<Arc<dyn TargetDatabase>, MigrationError> {
        let db = self.retry.run("connect", || self.connector.connect(&instance.connection)).await?;
        Ok(db)
    }

    fn known_revision(&self, current: Option<String>) -> Result<Option<String>, MigrationError> {
        match current {
            Some(current) if !self.registry.contains(&current) => Err(MigrationError::DatabaseNewer { current }),
            other => Ok(other),
        }
    }

    pub async fn check_status(&self, instance: &DatabaseInstance) -> Result<MigrationStatus, MigrationError> {
        let db = self.connect(instance).await?;
        let target = self.registry.head().to_string();

        let status = match db.current_revision().await? {
            None => MigrationStatus::FreshDatabase { target },
            Some(current) if !self.registry.contains(&current) => MigrationStatus::DatabaseNewer { current },
            Some(current) if current == target => MigrationStatus::UpToDate { revision: current },
            Some(current) => {
                let pending = self
                    .registry
                    .migrations_between(Some(&current), &target)?
                    .into_iter()
                    .map(|m| m.revision.clone())
                    .collect();
                MigrationStatus::MigrationRequired { current, target, pending }
            }
        };
        Ok(status)
    }

    /// Brings the database to the latest known revision.
    pub async fn initialize_schema(&self, instance: &DatabaseInstance) -> Result<SchemaReport, MigrationError> {
        self.upgrade_to(instance, HEAD).await
    }

    /// Brings the database to `target` (a revision or [`HEAD`]), then verifies integrity.
    pub async fn upgrade_to(&self, instance: &DatabaseInstance, target: &str) -> Result<SchemaReport, MigrationError> {
        let target = self.registry.resolve(target)?;
        let database = instance.database_name.as_str();
        let previous = self.states.get(database);
        if previous == SchemaState::Uninitialized {
            self.states.set(database, SchemaState::Initializing);
        }

        let result = self.upgrade_inner(instance, &target).await;
        match &result {
            Ok(report) => {
                self.states.set(database, SchemaState::AtRevision { revision: report.to_revision.clone() });
            }
            Err(MigrationError::MigrationStepFailed { .. }) => {}
            Err(e @ MigrationError::IntegrityCheckFailed(_)) => {
                self.states.set(database, SchemaState::Failed { revision: target.clone(), reason: e.to_string() });
            }
            Err(_) => self.states.set(database, previous),
        }
        result
    }

    async fn upgrade_inner(&self, instance: &DatabaseInstance, target: &str) -> Result<SchemaReport, MigrationError> {
        let db = self.connect(instance).await?;
        let database = instance.database_name.as_str();

        db.ensure_version_table().await?;
        db.execute_script(&self.baseline).await?;
        debug!(database, "Baseline schema loaded");

        let from_revision = self.known_revision(db.current_revision().await?)?;
        let pending = self.registry.migrations_between(from_revision.as_deref(), target)?;

        if pending.is_empty() {
            debug!(database, revision = target, "✅ Schema already at target revision");
        } else {
            info!(
                database,
                from = from_revision.as_deref().unwrap_or("none"),
                to = target,
                count = pending.len(),
                "🔄 Applying schema migrations"
            );
        }

        let mut committed = Vec::with_capacity(pending.len());
        let mut current = from_revision.clone();
        for migration in pending {
            match self.apply_on(db.as_ref(), instance, current.clone(), migration).await {
                Ok(()) => {
                    committed.push(migration.revision.clone());
                    current = Some(migration.revision.clone());
                }
                Err(MigrationError::MigrationStepFailed { revision, message, .. }) => {
                    return Err(MigrationError::MigrationStepFailed { revision, message, committed });
                }
                Err(e) => return Err(e),
            }
        }

        let table_count = self.verify_integrity(db.as_ref()).await?;
        if !committed.is_empty() {
            info!(database, revision = target, "🎉 Schema migration completed");
        }

        Ok(SchemaReport {
            database: database.to_string(),
            from_revision,
            to_revision: target.to_string(),
            revisions: committed,
            table_count,
        })
    }

    /// Applies one migration on top of the database's current revision.
    pub async fn apply_migration(&self, instance: &DatabaseInstance, migration: &Migration) -> Result<(), MigrationError> {
        let db = self.connect(instance).await?;
        db.ensure_version_table().await?;
        let current = db.current_revision().await?;
        self.apply_on(db.as_ref(), instance, current, migration).await
    }

    async fn apply_on(
        &self,
        db: &dyn TargetDatabase,
        instance: &DatabaseInstance,
        current: Option<String>,
        migration: &Migration,
    ) -> Result<(), MigrationError> {
        let database = instance.database_name.as_str();
        if migration.down_revision != current {
            return Err(MigrationError::RevisionMismatch {
                revision: migration.revision.clone(),
                expected: migration.down_revision.clone(),
                current,
            });
        }

        self.states.set(database, SchemaState::Migrating { from: current.clone(), to: migration.revision.clone() });
        self.checkpoint(db, instance, &migration.revision, current.as_deref()).await;

        match db.apply_revision(&migration.up, &migration.revision).await {
            Ok(()) => {
                info!(
                    database,
                    revision = %migration.revision,
                    description = %migration.description,
                    "✅ Migration applied"
                );
                self.states.set(database, SchemaState::AtRevision { revision: migration.revision.clone() });
                Ok(())
            }
            Err(e) => {
                error!(database, revision = %migration.revision, error = %e, "❌ Migration failed, transaction rolled back");
                self.states.set(
                    database,
                    SchemaState::Failed { revision: migration.revision.clone(), reason: e.to_string() },
                );
                Err(MigrationError::MigrationStepFailed {
                    revision: migration.revision.clone(),
                    message: e.to_string(),
                    committed: Vec::new(),
                })
            }
        }
    }

    /// Undoes every revision after `target`, newest first.
    pub async fn rollback_to_revision(
        &self,
        instance: &DatabaseInstance,
        target: &str,
    ) -> Result<SchemaReport, MigrationError> {
        let target = self.registry.resolve(target)?;
        let database = instance.database_name.as_str();
        let db = self.connect(instance).await?;

        let current = self.known_revision(db.current_revision().await?)?.ok_or(MigrationError::NotInitialized)?;
        let path = self.registry.rollback_path(&current, &target)?;

        let mut rolled_back = Vec::with_capacity(path.len());
        if !path.is_empty() {
            info!(database, from = %current, to = %target, count = path.len(), "⏪ Rolling back schema");
            self.states.set(database, SchemaState::Migrating { from: Some(current.clone()), to: target.clone() });
            self.checkpoint(db.as_ref(), instance, &target, Some(&current)).await;
        }

        for migration in path {
            let Some(parent) = migration.down_revision.as_deref() else {
                return Err(MigrationError::InvalidRegistry(format!("revision '{}' has no parent", migration.revision)));
            };
            if let Err(e) = db.apply_revision(&migration.down, parent).await {
                error!(database, revision = %migration.revision, error = %e, "❌ Rollback step failed");
                self.states.set(
                    database,
                    SchemaState::Failed { revision: migration.revision.clone(), reason: e.to_string() },
                );
                return Err(MigrationError::RollbackStepFailed {
                    revision: migration.revision.clone(),
                    message: e.to_string(),
                    rolled_back,
                });
            }
            debug!(database, revision = %migration.revision, now_at = parent, "Revision rolled back");
            rolled_back.push(migration.revision.clone());
        }

        self.states.set(database, SchemaState::AtRevision { revision: target.clone() });
        let table_count = db.list_tables().await?.len();

        Ok(SchemaReport {
            database: database.to_string(),
            from_revision: Some(current),
            to_revision: target,
            revisions: rolled_back,
            table_count,
        })
    }

    pub async fn get_schema_info(&self, instance: &DatabaseInstance) -> Result<SchemaInfo, MigrationError> {
        let db = self.connect(instance).await?;
        let revision = db.current_revision().await?;
        let tables = db.list_tables().await?;
        Ok(SchemaInfo {
            database: instance.database_name.clone(),
            revision,
            table_count: tables.len(),
            tables,
            state: self.state(instance),
        })
    }

    /// Non-empty catalog and exactly one version row. Returns the table count.
    async fn verify_integrity(&self, db: &dyn TargetDatabase) -> Result<usize, MigrationError> {
        let tables = db.list_tables().await?;
        if tables.is_empty() {
            return Err(MigrationError::IntegrityCheckFailed("database has no tables".to_string()));
        }
        let rows = db.version_row_count().await?;
        if rows != 1 {
            return Err(MigrationError::IntegrityCheckFailed(format!(
                "expected exactly one version row, found {}",
                rows
            )));
        }
        Ok(tables.len())
    }

    async fn checkpoint(
        &self,
        db: &dyn TargetDatabase,
        instance: &DatabaseInstance,
        target_revision: &str,
        current_revision: Option<&str>,
    ) {
        let platform = instance.platform();
        let tables = match db.list_tables().await {
            Ok(tables) => tables,
            Err(e) => {
                warn!(platform = %platform, error = %e, "Could not read table inventory for checkpoint");
                Vec::new()
            }
        };
        match self.backups.record(&platform, target_revision, current_revision, tables).await {
            Ok(checkpoint) => debug!(platform = %platform, backup = %checkpoint.name, "📸 Backup checkpoint recorded"),
            Err(e) => warn!(platform = %platform, error = %e, "Failed to record backup checkpoint, continuing"),
        }
    }
}
