//! Tenant scoped operations.
//!
//! Resolves a tenant to its database endpoint and runs migrations under the tenant's lock
//! (`tenant_{id}`). The lock is released after every attempt, whatever its outcome. Registering the
//! reached version with the [`LockCoordinator`] happens after the database commit and can fail on its
//! own; the result reports it instead of hiding it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use strum_macros::Display;
use tracing::{debug, error, info, warn};

use crate::coordinator::{CoordinationError, LockCoordinator};
use crate::core::client::lock::constant::TENANT_ENDPOINTS_HASH;
use crate::core::client::lock::{CoordinationStore, LockError};
use crate::error::TenantDbResult;
use crate::health::HealthValidator;
use crate::provisioner::Provisioner;
use crate::schema::{MigrationError, MigrationStatus, SchemaManager, SchemaReport};
use crate::types::health::HealthCheckResult;
use crate::types::instance::{ConnectionDescriptor, DatabaseInstance, InstanceStatus, TenantEndpointUpdates};
use crate::types::params::database::PostgresArgs;
use crate::types::version::BackupCheckpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MigrationOperation {
    Upgrade,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MigrationOutcome {
    Succeeded,
    /// The database reached the target but the version registry was not updated.
    RegistryUpdateFailed,
    Failed,
}

/// What happened during one locked tenant migration.
#[derive(Debug, Clone, Serialize)]
pub struct TenantMigrationResult {
    pub tenant_id: String,
    pub platform: String,
    pub operation: MigrationOperation,
    pub outcome: MigrationOutcome,
    pub target_revision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_revision: Option<String>,
    /// Applied (upgrade) or undone (rollback) revisions that are committed.
    pub revisions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupCheckpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub lock_released: bool,
}

impl TenantMigrationResult {
    pub fn is_success(&self) -> bool {
        self.outcome == MigrationOutcome::Succeeded
    }
}

/// Read only view of a tenant's schema.
#[derive(Debug, Clone, Serialize)]
pub struct TenantMigrationStatus {
    pub tenant_id: String,
    pub platform: String,
    pub database: String,
    pub revision: Option<String>,
    /// Version held by the cross-platform registry, may lag behind `revision`.
    pub registered_version: Option<String>,
    pub table_count: usize,
    pub backup_count: usize,
    pub locked: bool,
    pub migration: MigrationStatus,
}

pub struct TenantRegistry {
    store: Arc<dyn CoordinationStore>,
    postgres: PostgresArgs,
    provisioner: Arc<Provisioner>,
    schema: Arc<SchemaManager>,
    coordinator: Arc<LockCoordinator>,
    health: Arc<HealthValidator>,
    lock_timeout: Duration,
}

impl TenantRegistry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        postgres: PostgresArgs,
        provisioner: Arc<Provisioner>,
        schema: Arc<SchemaManager>,
        coordinator: Arc<LockCoordinator>,
        health: Arc<HealthValidator>,
        lock_timeout: Duration,
    ) -> Self {
        Self { store, postgres, provisioner, schema, coordinator, health, lock_timeout }
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    pub fn coordinator(&self) -> &LockCoordinator {
        &self.coordinator
    }

    pub fn health(&self) -> &HealthValidator {
        &self.health
    }

    fn normalized(&self, tenant_id: &str) -> TenantDbResult<(String, String, String)> {
        Ok(self.provisioner.names_for(tenant_id)?)
    }

    /// Registered endpoint of the tenant, or the conventional one on the configured server.
    ///
    /// The fallback is a development convenience: it assumes the tenant database lives on the admin
    /// server and uses the admin credentials.
    pub async fn get_tenant_endpoint(&self, tenant_id: &str) -> TenantDbResult<ConnectionDescriptor> {
        let (tenant, database, _) = self.normalized(tenant_id)?;
        if let Some(value) = self.store.hash_get(TENANT_ENDPOINTS_HASH, &tenant).await? {
            let descriptor = serde_json::from_str(&value)
                .map_err(|e| LockError::Serialization { key: tenant.clone(), message: e.to_string() })?;
            return Ok(descriptor);
        }
        debug!(tenant_id = %tenant, "No registered endpoint, using the default descriptor");
        Ok(self.postgres.descriptor_for(&database, &self.postgres.admin_user, &self.postgres.admin_password))
    }

    pub async fn register_tenant_endpoint(&self, tenant_id: &str, descriptor: &ConnectionDescriptor) -> TenantDbResult<()> {
        let (tenant, _, _) = self.normalized(tenant_id)?;
        let value = serde_json::to_string(descriptor)
            .map_err(|e| LockError::Serialization { key: tenant.clone(), message: e.to_string() })?;
        self.store.hash_set(TENANT_ENDPOINTS_HASH, &tenant, &value).await?;
        info!(tenant_id = %tenant, host = %descriptor.host, database = %descriptor.database, "Tenant endpoint registered");
        Ok(())
    }

    pub async fn update_tenant_endpoint(
        &self,
        tenant_id: &str,
        updates: TenantEndpointUpdates,
    ) -> TenantDbResult<ConnectionDescriptor> {
        let mut descriptor = self.get_tenant_endpoint(tenant_id).await?;
        if updates.is_empty() {
            return Ok(descriptor);
        }
        updates.apply_to(&mut descriptor);
        self.register_tenant_endpoint(tenant_id, &descriptor).await?;
        Ok(descriptor)
    }

    /// Instance handle for an existing tenant, built from its endpoint.
    pub async fn instance(&self, tenant_id: &str) -> TenantDbResult<DatabaseInstance> {
        let (tenant, _, role) = self.normalized(tenant_id)?;
        let endpoint = self.get_tenant_endpoint(&tenant).await?;
        Ok(DatabaseInstance::new(&tenant, &role, endpoint, InstanceStatus::Existing))
    }

    /// Provisions the tenant database and registers its endpoint.
    pub async fn provision_tenant(&self, tenant_id: &str) -> TenantDbResult<DatabaseInstance> {
        let instance = self.provisioner.create_instance(tenant_id).await?;
        self.register_tenant_endpoint(&instance.tenant_id, &instance.connection).await?;
        Ok(instance)
    }

    /// Drops the tenant database and role and forgets its endpoint. Safe to repeat.
    pub async fn delete_tenant(&self, tenant_id: &str) -> TenantDbResult<()> {
        let instance = self.instance(tenant_id).await?;
        self.provisioner.delete_instance(&instance).await?;
        self.store.hash_delete(TENANT_ENDPOINTS_HASH, &instance.tenant_id).await?;
        Ok(())
    }

    /// Runs a caller provided SQL script against the tenant database in one transaction.
    pub async fn seed_tenant(&self, tenant_id: &str, script: &str) -> TenantDbResult<()> {
        let instance = self.instance(tenant_id).await?;
        let db = self.schema.connect(&instance).await?;
        db.execute_in_transaction(&[script.to_string()]).await?;
        info!(tenant_id = %instance.tenant_id, bytes = script.len(), "🌱 Seed script applied");
        Ok(())
    }

    /// Migrates the tenant to `version` (a revision or `head`) under its lock.
    ///
    /// Fails with [`CoordinationError::LockContention`] when the tenant is already locked. Any other
    /// failure is reported in the returned result.
    pub async fn migrate_tenant(&self, tenant_id: &str, version: &str) -> TenantDbResult<TenantMigrationResult> {
        let target = self.schema.registry().resolve(version)?;
        let instance = self.instance(tenant_id).await?;
        let platform = instance.platform();

        let (mut result, lock_released) =
            self.with_tenant_lock(&platform, || self.upgrade_locked(&instance, &platform, &target)).await?;
        result.lock_released = lock_released;
        Ok(result)
    }

    /// Rolls the tenant back to `target` under its lock.
    pub async fn rollback_tenant(&self, tenant_id: &str, target: &str) -> TenantDbResult<TenantMigrationResult> {
        let target = self.schema.registry().resolve(target)?;
        let instance = self.instance(tenant_id).await?;
        let platform = instance.platform();

        let (mut result, lock_released) =
            self.with_tenant_lock(&platform, || self.rollback_locked(&instance, &platform, &target)).await?;
        result.lock_released = lock_released;
        Ok(result)
    }

    pub async fn get_tenant_migration_status(&self, tenant_id: &str) -> TenantDbResult<TenantMigrationStatus> {
        let instance = self.instance(tenant_id).await?;
        let platform = instance.platform();

        let info = self.schema.get_schema_info(&instance).await?;
        let migration = self.schema.check_status(&instance).await?;
        let registered_version = self.coordinator.get_version(&platform).await?.map(|entry| entry.version);
        let backup_count = self.schema.backups().count(&platform).await?;
        let locked = self.coordinator.is_locked(&platform).await?;

        Ok(TenantMigrationStatus {
            tenant_id: instance.tenant_id.clone(),
            platform,
            database: info.database,
            revision: info.revision,
            registered_version,
            table_count: info.table_count,
            backup_count,
            locked,
            migration,
        })
    }

    pub async fn check_tenant_health(&self, tenant_id: &str) -> TenantDbResult<HealthCheckResult> {
        let instance = self.instance(tenant_id).await?;
        Ok(self.health.validate(&instance).await)
    }

    /// Runs `operation` while holding the platform lock, then releases it whatever happened.
    async fn with_tenant_lock<T, F, Fut>(&self, platform: &str, operation: F) -> TenantDbResult<(T, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let token = self
            .coordinator
            .acquire_lock(platform, self.lock_timeout)
            .await?
            .ok_or_else(|| CoordinationError::LockContention { platform: platform.to_string() })?;

        let output = operation().await;

        let released = match self.coordinator.release_lock(platform, &token).await {
            Ok(released) => released,
            Err(e) => {
                error!(platform, error = %e, "Failed to release tenant lock, it will expire with its TTL");
                false
            }
        };
        Ok((output, released))
    }

    async fn record_backup(
        &self,
        instance: &DatabaseInstance,
        platform: &str,
        target: &str,
    ) -> (Option<String>, Option<BackupCheckpoint>) {
        let info = match self.schema.get_schema_info(instance).await {
            Ok(info) => info,
            Err(e) => {
                warn!(platform, error = %e, "Could not read schema before migration");
                return (None, None);
            }
        };
        match self.schema.backups().record(platform, target, info.revision.as_deref(), info.tables).await {
            Ok(checkpoint) => (info.revision, Some(checkpoint)),
            Err(e) => {
                warn!(platform, error = %e, "Failed to record backup checkpoint, continuing");
                (info.revision, None)
            }
        }
    }

    async fn upgrade_locked(&self, instance: &DatabaseInstance, platform: &str, target: &str) -> TenantMigrationResult {
        let (from_revision, backup) = self.record_backup(instance, platform, target).await;
        let mut result = TenantMigrationResult {
            tenant_id: instance.tenant_id.clone(),
            platform: platform.to_string(),
            operation: MigrationOperation::Upgrade,
            outcome: MigrationOutcome::Failed,
            target_revision: target.to_string(),
            from_revision,
            revisions: Vec::new(),
            backup,
            error: None,
            lock_released: false,
        };

        match self.schema.upgrade_to(instance, target).await {
            Ok(report) => {
                result.from_revision = report.from_revision.clone();
                result.revisions = report.revisions.clone();
                let metadata = json!({ "tenant_id": instance.tenant_id, "applied": report.revisions });
                self.register(&mut result, &report, metadata).await;
            }
            Err(e) => {
                error!(tenant_id = %instance.tenant_id, error = %e, "Tenant migration failed");
                result.revisions = e.committed().to_vec();
                result.error = Some(e.to_string());
                // the database moved forward before failing, keep the registry in step with it
                if let Some(reached) = result.revisions.last().cloned() {
                    let metadata = json!({ "tenant_id": instance.tenant_id, "partial": true });
                    if let Err(e) = self.coordinator.register_version(platform, &reached, metadata).await {
                        warn!(platform, revision = %reached, error = %e, "Failed to register partially reached version");
                    }
                }
            }
        }
        result
    }

    async fn rollback_locked(&self, instance: &DatabaseInstance, platform: &str, target: &str) -> TenantMigrationResult {
        let (from_revision, backup) = self.record_backup(instance, platform, target).await;
        let mut result = TenantMigrationResult {
            tenant_id: instance.tenant_id.clone(),
            platform: platform.to_string(),
            operation: MigrationOperation::Rollback,
            outcome: MigrationOutcome::Failed,
            target_revision: target.to_string(),
            from_revision,
            revisions: Vec::new(),
            backup,
            error: None,
            lock_released: false,
        };

        match self.schema.rollback_to_revision(instance, target).await {
            Ok(report) => {
                result.revisions = report.revisions.clone();
                let metadata = json!({ "tenant_id": instance.tenant_id, "rolled_back": report.revisions });
                self.register(&mut result, &report, metadata).await;
            }
            Err(e) => {
                error!(tenant_id = %instance.tenant_id, error = %e, "Tenant rollback failed");
                if let MigrationError::RollbackStepFailed { rolled_back, .. } = &e {
                    result.revisions = rolled_back.clone();
                }
                result.error = Some(e.to_string());
                // revisions undone before the failure are committed; point the registry at the one reached
                let reached = result
                    .revisions
                    .last()
                    .and_then(|undone| self.schema.registry().get(undone))
                    .and_then(|migration| migration.down_revision.clone());
                if let Some(reached) = reached {
                    let metadata = json!({ "tenant_id": instance.tenant_id, "rolled_back": result.revisions, "partial": true });
                    if let Err(e) = self.coordinator.register_version(platform, &reached, metadata).await {
                        warn!(platform, revision = %reached, error = %e, "Failed to register partially reached version");
                    }
                }
            }
        }
        result
    }

    async fn register(&self, result: &mut TenantMigrationResult, report: &SchemaReport, metadata: serde_json::Value) {
        match self.coordinator.register_version(&result.platform, &report.to_revision, metadata).await {
            Ok(_) => {
                result.outcome = MigrationOutcome::Succeeded;
                info!(
                    platform = %result.platform,
                    operation = %result.operation,
                    revision = %report.to_revision,
                    "✅ Tenant schema at target revision"
                );
            }
            Err(e) => {
                warn!(platform = %result.platform, error = %e, "Database migrated but version registry not updated");
                result.outcome = MigrationOutcome::RegistryUpdateFailed;
                result.error = Some(e.to_string());
            }
        }
    }
}

