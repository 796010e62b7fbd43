use std::sync::Arc;

use assert_matches::assert_matches;
use rstest::*;

use crate::coordinator::CoordinationError;
use crate::core::client::lock::constant::VERSION_HISTORY_PREFIX;
use crate::error::TenantDbError;
use crate::provisioner::ProvisionError;
use crate::registry::{MigrationOperation, MigrationOutcome};
use crate::schema::{MigrationError, MigrationStatus};
use crate::tests::common::fakes::HashOutageStore;
use crate::tests::common::{services, TestServices, TestServicesBuilder, TEST_LOCK_TIMEOUT};
use crate::types::health::HealthStatus;
use crate::types::instance::{InstanceStatus, TenantEndpointUpdates};

#[rstest]
#[tokio::test]
async fn provision_registers_the_tenant_endpoint(services: TestServices) {
    let instance = services.registry.provision_tenant("acme").await.unwrap();

    let endpoint = services.registry.get_tenant_endpoint("acme").await.unwrap();

    assert_eq!(endpoint, instance.connection);
    assert_eq!(endpoint.username, "tenant_acme_owner");
}

#[rstest]
#[tokio::test]
async fn second_provision_is_a_conflict(services: TestServices) {
    services.registry.provision_tenant("acme").await.unwrap();

    let result = services.registry.provision_tenant("acme").await;

    assert_matches!(result, Err(TenantDbError::Provision(ProvisionError::Conflict { .. })));
    assert_eq!(result.unwrap_err().kind(), "provisioning_conflict");
}

#[rstest]
#[tokio::test]
async fn adopting_keeps_provisioning_repeatable() {
    let services = TestServicesBuilder::new().adopt_existing().build();
    services.registry.provision_tenant("acme").await.unwrap();

    let again = services.registry.provision_tenant("acme").await.unwrap();

    assert_eq!(again.status, InstanceStatus::Existing);
    // the endpoint follows the rotated password
    assert_eq!(services.registry.get_tenant_endpoint("acme").await.unwrap().password, again.connection.password);
}

#[rstest]
#[tokio::test]
async fn unregistered_tenant_falls_back_to_admin_endpoint(services: TestServices) {
    let endpoint = services.registry.get_tenant_endpoint("Globex").await.unwrap();

    assert_eq!(endpoint.database, "tenant_globex");
    assert_eq!(endpoint.username, "postgres");
    assert_eq!(endpoint.host, "pg.test");
}

#[rstest]
#[tokio::test]
async fn endpoint_updates_are_persisted(services: TestServices) {
    services.registry.provision_tenant("acme").await.unwrap();

    let updated = services
        .registry
        .update_tenant_endpoint("acme", TenantEndpointUpdates::new().update_host("replica.internal").update_port(6432))
        .await
        .unwrap();

    assert_eq!(updated.host, "replica.internal");
    let stored = services.registry.get_tenant_endpoint("acme").await.unwrap();
    assert_eq!(stored, updated);
    assert_eq!(stored.port, 6432);
    assert_eq!(stored.database, "tenant_acme");
}

#[rstest]
#[tokio::test]
async fn migrate_tenant_to_head_registers_version_and_releases_lock(services: TestServices) {
    services.registry.provision_tenant("acme").await.unwrap();

    let result = services.registry.migrate_tenant("acme", "head").await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.operation, MigrationOperation::Upgrade);
    assert_eq!(result.platform, "tenant_acme");
    assert_eq!(result.target_revision, "0004");
    assert_eq!(result.revisions, vec!["0001", "0002", "0003", "0004"]);
    assert!(result.lock_released);
    assert!(result.backup.is_some());

    assert!(!services.coordinator().is_locked("tenant_acme").await.unwrap());
    let registered = services.coordinator().get_version("tenant_acme").await.unwrap().unwrap();
    assert_eq!(registered.version, "0004");
    assert_eq!(registered.metadata["tenant_id"], "acme");
}

#[rstest]
#[tokio::test]
async fn migrate_tenant_fails_fast_on_held_lock(services: TestServices) {
    services.registry.provision_tenant("acme").await.unwrap();
    let holder = services.coordinator().acquire_lock("tenant_acme", TEST_LOCK_TIMEOUT).await.unwrap().unwrap();

    let result = services.registry.migrate_tenant("acme", "head").await;

    assert_matches!(
        result,
        Err(TenantDbError::Coordination(CoordinationError::LockContention { platform })) if platform == "tenant_acme"
    );
    let db = services.cluster.database("tenant_acme").unwrap();
    assert!(db.version_rows().is_empty());
    // the other holder still owns the lock
    assert!(services.coordinator().release_lock("tenant_acme", &holder).await.unwrap());
}

#[rstest]
#[tokio::test]
async fn failed_migration_still_releases_lock_and_records_progress(services: TestServices) {
    services.registry.provision_tenant("acme").await.unwrap();
    let db = services.cluster.database("tenant_acme").unwrap();
    db.fail_statements_containing("network_devices");

    let result = services.registry.migrate_tenant("acme", "head").await.unwrap();

    assert_eq!(result.outcome, MigrationOutcome::Failed);
    assert!(!result.is_success());
    assert_eq!(result.revisions, vec!["0001"]);
    assert!(result.error.as_deref().unwrap_or_default().contains("0002"));
    assert!(result.lock_released);
    assert!(!services.coordinator().is_locked("tenant_acme").await.unwrap());

    let registered = services.coordinator().get_version("tenant_acme").await.unwrap().unwrap();
    assert_eq!(registered.version, "0001");
    assert_eq!(registered.metadata["partial"], true);
}

#[rstest]
#[tokio::test]
async fn unknown_target_is_rejected_before_locking(services: TestServices) {
    services.registry.provision_tenant("acme").await.unwrap();

    let result = services.registry.migrate_tenant("acme", "9999").await;

    assert_matches!(result, Err(TenantDbError::Migration(MigrationError::UnknownRevision(_))));
    assert!(services.coordinator().active_locks().await.unwrap().is_empty());
}

#[rstest]
#[tokio::test]
async fn rollback_tenant_moves_registry_back(services: TestServices) {
    services.registry.provision_tenant("acme").await.unwrap();
    services.registry.migrate_tenant("acme", "0003").await.unwrap();

    let result = services.registry.rollback_tenant("acme", "0001").await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.operation, MigrationOperation::Rollback);
    assert_eq!(result.from_revision.as_deref(), Some("0003"));
    assert_eq!(result.revisions, vec!["0003", "0002"]);
    assert!(result.lock_released);

    let history: Vec<String> = services
        .coordinator()
        .get_version_history("tenant_acme")
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.version)
        .collect();
    assert_eq!(history, vec!["0003", "0001"]);

    let db = services.cluster.database("tenant_acme").unwrap();
    assert!(!db.has_table("network_devices"));
    assert!(db.has_table("customers"));
}

#[rstest]
#[tokio::test]
async fn rollback_ahead_of_current_fails_inside_the_lock(services: TestServices) {
    services.registry.provision_tenant("acme").await.unwrap();
    services.registry.migrate_tenant("acme", "0001").await.unwrap();

    let result = services.registry.rollback_tenant("acme", "0004").await.unwrap();

    assert_eq!(result.outcome, MigrationOutcome::Failed);
    assert!(result.lock_released);
    assert_eq!(services.coordinator().get_version("tenant_acme").await.unwrap().unwrap().version, "0001");
}

#[rstest]
#[tokio::test]
async fn failed_rollback_registers_the_revision_reached(services: TestServices) {
    services.registry.provision_tenant("acme").await.unwrap();
    services.registry.migrate_tenant("acme", "0003").await.unwrap();
    let db = services.cluster.database("tenant_acme").unwrap();
    db.fail_statements_containing("network_devices");

    let result = services.registry.rollback_tenant("acme", "0001").await.unwrap();

    assert_eq!(result.outcome, MigrationOutcome::Failed);
    assert_eq!(result.revisions, vec!["0003"]);
    assert!(result.lock_released);
    assert_eq!(db.version_rows(), vec!["0002"]);

    let registered = services.coordinator().get_version("tenant_acme").await.unwrap().unwrap();
    assert_eq!(registered.version, "0002");
    assert_eq!(registered.metadata["partial"], true);
}

#[rstest]
#[tokio::test]
async fn migration_status_combines_database_and_registry(services: TestServices) {
    services.registry.provision_tenant("acme").await.unwrap();
    services.registry.migrate_tenant("acme", "0002").await.unwrap();

    let status = services.registry.get_tenant_migration_status("acme").await.unwrap();

    assert_eq!(status.revision.as_deref(), Some("0002"));
    assert_eq!(status.registered_version.as_deref(), Some("0002"));
    assert_eq!(status.database, "tenant_acme");
    assert!(!status.locked);
    // one from the registry and one per applied revision
    assert_eq!(status.backup_count, 3);
    assert_matches!(status.migration, MigrationStatus::MigrationRequired { pending, .. } if pending == vec!["0003", "0004"]);
}

#[rstest]
#[tokio::test]
async fn seed_runs_in_one_transaction(services: TestServices) {
    services.registry.provision_tenant("acme").await.unwrap();
    services.registry.migrate_tenant("acme", "head").await.unwrap();
    let db = services.cluster.database("tenant_acme").unwrap();

    services
        .registry
        .seed_tenant("acme", "CREATE TABLE IF NOT EXISTS seeded_marker (id INT); INSERT INTO seeded_marker VALUES (1);")
        .await
        .unwrap();
    assert!(db.has_table("seeded_marker"));

    db.fail_statements_containing("broken_marker");
    let result = services.registry.seed_tenant("acme", "CREATE TABLE IF NOT EXISTS broken_marker (id INT);").await;
    assert_matches!(result, Err(TenantDbError::Database(_)));
    assert!(!db.has_table("broken_marker"));
}

#[rstest]
#[tokio::test]
async fn health_of_migrated_tenant_is_healthy(services: TestServices) {
    services.registry.provision_tenant("acme").await.unwrap();
    services.registry.migrate_tenant("acme", "head").await.unwrap();

    let result = services.registry.check_tenant_health("acme").await.unwrap();

    assert_eq!(result.status, HealthStatus::Healthy);
    assert_eq!(services.registry.health().latest_report("acme").await, Some(result));
}

#[rstest]
#[tokio::test]
async fn health_of_fresh_tenant_is_degraded(services: TestServices) {
    services.registry.provision_tenant("acme").await.unwrap();

    let result = services.registry.check_tenant_health("acme").await.unwrap();

    assert_eq!(result.status, HealthStatus::Degraded);
}

#[rstest]
#[tokio::test]
async fn delete_tenant_drops_database_and_endpoint(services: TestServices) {
    let instance = services.registry.provision_tenant("acme").await.unwrap();

    services.registry.delete_tenant("acme").await.unwrap();

    assert!(services.cluster.database("tenant_acme").is_none());
    let endpoint = services.registry.get_tenant_endpoint("acme").await.unwrap();
    assert_ne!(endpoint, instance.connection);
    assert_eq!(endpoint.username, "postgres");

    // deleting again is harmless
    services.registry.delete_tenant("acme").await.unwrap();
}

#[rstest]
#[tokio::test]
async fn tenants_are_checked_for_consistency(services: TestServices) {
    for tenant in ["a", "b", "c"] {
        services.registry.provision_tenant(tenant).await.unwrap();
    }
    services.registry.migrate_tenant("a", "head").await.unwrap();
    services.registry.migrate_tenant("b", "head").await.unwrap();
    services.registry.migrate_tenant("c", "0002").await.unwrap();

    let report = services.coordinator().check_consistency().await.unwrap();

    assert_eq!(report.reference_version.as_deref(), Some("0004"));
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!(report.mismatches[0].platforms, vec!["tenant_c".to_string()]);
}

#[rstest]
#[tokio::test]
async fn invalid_tenant_ids_are_rejected(services: TestServices) {
    let result = services.registry.migrate_tenant("../etc", "head").await;
    assert_matches!(result, Err(TenantDbError::Provision(ProvisionError::InvalidTenantId(_))));
    assert_eq!(services.connector.connect_calls(), 0);
}

#[rstest]
#[tokio::test]
async fn registry_outage_after_migration_is_reported_not_hidden() {
    let store = Arc::new(HashOutageStore::new(VERSION_HISTORY_PREFIX));
    let services = TestServicesBuilder::new().with_store(store).build();
    services.registry.provision_tenant("acme").await.unwrap();

    let result = services.registry.migrate_tenant("acme", "head").await.unwrap();

    assert_eq!(result.outcome, MigrationOutcome::RegistryUpdateFailed);
    assert!(!result.is_success());
    assert!(result.lock_released);
    // the database itself reached the target
    let db = services.cluster.database("tenant_acme").unwrap();
    assert_eq!(db.version_rows(), vec!["0004"]);
    assert!(services.coordinator().get_version("tenant_acme").await.unwrap().is_none());
}
