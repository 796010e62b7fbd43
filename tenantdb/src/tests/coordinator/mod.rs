use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use rstest::*;
use serde_json::json;

use crate::coordinator::{CoordinationError, LockCoordinator};
use crate::core::client::lock::constant::VERSION_HISTORY_PREFIX;
use crate::core::client::lock::memory::MemoryCoordinationStore;
use crate::core::client::lock::{LockError, MockCoordinationStore};
use crate::tests::common::fakes::HashOutageStore;
use crate::types::version::{CoordinationStatus, LockToken};

const TTL: Duration = Duration::from_secs(10);

#[fixture]
fn coordinator() -> LockCoordinator {
    LockCoordinator::new(Arc::new(MemoryCoordinationStore::new()))
}

fn platforms(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[rstest]
#[tokio::test]
async fn lock_is_exclusive_until_released(coordinator: LockCoordinator) {
    let token = coordinator.acquire_lock("tenant_acme", TTL).await.unwrap().expect("first acquire wins");
    assert!(coordinator.acquire_lock("tenant_acme", TTL).await.unwrap().is_none());
    assert!(coordinator.is_locked("tenant_acme").await.unwrap());

    assert!(coordinator.release_lock("tenant_acme", &token).await.unwrap());
    assert!(!coordinator.is_locked("tenant_acme").await.unwrap());
    assert!(coordinator.acquire_lock("tenant_acme", TTL).await.unwrap().is_some());
}

#[rstest]
#[tokio::test]
async fn release_with_foreign_token_keeps_the_lock(coordinator: LockCoordinator) {
    let _token = coordinator.acquire_lock("tenant_acme", TTL).await.unwrap().unwrap();

    let released = coordinator.release_lock("tenant_acme", &LockToken::from("not-the-owner")).await.unwrap();

    assert!(!released);
    assert!(coordinator.is_locked("tenant_acme").await.unwrap());
}

#[rstest]
#[tokio::test]
async fn locks_on_different_platforms_are_independent(coordinator: LockCoordinator) {
    assert!(coordinator.acquire_lock("tenant_a", TTL).await.unwrap().is_some());
    assert!(coordinator.acquire_lock("tenant_b", TTL).await.unwrap().is_some());

    assert_eq!(coordinator.active_locks().await.unwrap(), platforms(&["tenant_a", "tenant_b"]));
}

#[tokio::test(start_paused = true)]
async fn expired_lock_can_be_taken_and_old_token_is_useless() {
    let coordinator = LockCoordinator::new(Arc::new(MemoryCoordinationStore::new()));
    let stale = coordinator.acquire_lock("tenant_acme", TTL).await.unwrap().unwrap();

    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    assert!(!coordinator.is_locked("tenant_acme").await.unwrap());

    let fresh = coordinator.acquire_lock("tenant_acme", TTL).await.unwrap().expect("expired lock is free");
    assert!(!coordinator.release_lock("tenant_acme", &stale).await.unwrap());
    assert!(coordinator.is_locked("tenant_acme").await.unwrap());
    assert!(coordinator.release_lock("tenant_acme", &fresh).await.unwrap());
}

#[rstest]
#[tokio::test]
async fn register_version_moves_pointer_and_keeps_history(coordinator: LockCoordinator) {
    coordinator.register_version("web", "0001", json!({})).await.unwrap();
    coordinator.register_version("web", "0002", json!({ "note": "second" })).await.unwrap();

    let current = coordinator.get_version("web").await.unwrap().expect("pointer exists");
    assert_eq!(current.version, "0002");
    assert_eq!(current.metadata["note"], "second");

    let history: Vec<String> =
        coordinator.get_version_history("web").await.unwrap().into_iter().map(|entry| entry.version).collect();
    assert_eq!(history, vec!["0001", "0002"]);

    assert!(coordinator.get_version("mobile").await.unwrap().is_none());
    assert!(coordinator.get_version_history("mobile").await.unwrap().is_empty());
}

#[rstest]
#[tokio::test]
async fn consistency_reports_minority_versions(coordinator: LockCoordinator) {
    coordinator.register_version("A", "v3", json!({})).await.unwrap();
    coordinator.register_version("B", "v3", json!({})).await.unwrap();
    coordinator.register_version("C", "v2", json!({})).await.unwrap();

    let report = coordinator.check_consistency().await.unwrap();

    assert!(!report.is_consistent());
    assert_eq!(report.reference_version.as_deref(), Some("v3"));
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!(report.mismatches[0].version, "v2");
    assert_eq!(report.mismatches[0].platforms, platforms(&["C"]));
    assert_eq!(report.platform_count(), 3);
}

#[rstest]
#[tokio::test]
async fn consistency_tie_prefers_greatest_version(coordinator: LockCoordinator) {
    coordinator.register_version("A", "0001", json!({})).await.unwrap();
    coordinator.register_version("B", "0002", json!({})).await.unwrap();

    let report = coordinator.check_consistency().await.unwrap();

    assert_eq!(report.reference_version.as_deref(), Some("0002"));
    assert_eq!(report.mismatches[0].platforms, platforms(&["A"]));
}

#[rstest]
#[tokio::test]
async fn consistency_of_nothing_is_consistent(coordinator: LockCoordinator) {
    let report = coordinator.check_consistency().await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.reference_version, None);
    assert_eq!(report.platform_count(), 0);
}

#[rstest]
#[tokio::test]
async fn coordination_releases_acquired_locks_on_contention(coordinator: LockCoordinator) {
    coordinator.register_version("A", "0003", json!({})).await.unwrap();
    coordinator.register_version("B", "0003", json!({})).await.unwrap();
    let _held = coordinator.acquire_lock("B", TTL).await.unwrap().unwrap();

    let result = coordinator.coordinate_multi_platform_migration("0004", &platforms(&["A", "B", "C"]), TTL).await;

    assert_matches!(result, Err(CoordinationError::LockContention { platform }) if platform == "B");
    assert!(!coordinator.is_locked("A").await.unwrap());
    assert!(!coordinator.is_locked("C").await.unwrap());
    assert!(coordinator.is_locked("B").await.unwrap());
    for platform in ["A", "B"] {
        assert_eq!(coordinator.get_version(platform).await.unwrap().unwrap().version, "0003");
    }
    assert!(coordinator.get_version("C").await.unwrap().is_none());
}

#[rstest]
#[tokio::test]
async fn coordination_without_platforms_is_rejected(coordinator: LockCoordinator) {
    let result = coordinator.coordinate_multi_platform_migration("0004", &[], TTL).await;
    assert_matches!(result, Err(CoordinationError::InvalidRequest(_)));
}

#[rstest]
#[tokio::test]
async fn coordinated_migration_completes(coordinator: LockCoordinator) {
    let record = coordinator
        .coordinate_multi_platform_migration("0004", &platforms(&["A", "B", "A"]), TTL)
        .await
        .unwrap();
    assert_eq!(record.platforms, platforms(&["A", "B"]));
    assert_eq!(record.status, CoordinationStatus::Coordinated);
    assert!(coordinator.is_locked("A").await.unwrap());
    assert!(coordinator.is_locked("B").await.unwrap());

    let results = BTreeMap::from([("A".to_string(), true), ("B".to_string(), true)]);
    let finalized = coordinator.finalize_coordinated_migration(&record.migration_id, &results).await.unwrap();

    assert_eq!(finalized.status, CoordinationStatus::Completed);
    assert!(finalized.finalized_at.is_some());
    assert!(coordinator.active_locks().await.unwrap().is_empty());
    assert_eq!(coordinator.get_version("A").await.unwrap().unwrap().version, "0004");
    assert_eq!(coordinator.get_version("B").await.unwrap().unwrap().version, "0004");
    assert!(coordinator.check_consistency().await.unwrap().is_consistent());
}

#[rstest]
#[tokio::test]
async fn coordinated_migration_partially_completes(coordinator: LockCoordinator) {
    let record =
        coordinator.coordinate_multi_platform_migration("0004", &platforms(&["A", "B"]), TTL).await.unwrap();

    // B is not reported at all, which counts as a failure
    let results = BTreeMap::from([("A".to_string(), true)]);
    let finalized = coordinator.finalize_coordinated_migration(&record.migration_id, &results).await.unwrap();

    assert_eq!(finalized.status, CoordinationStatus::PartiallyCompleted);
    assert_eq!(finalized.results.get("B"), Some(&false));
    assert!(coordinator.get_version("B").await.unwrap().is_none());
    assert!(!coordinator.is_locked("B").await.unwrap());
}

#[rstest]
#[tokio::test]
async fn coordinated_migration_failing_everywhere(coordinator: LockCoordinator) {
    let record = coordinator.coordinate_multi_platform_migration("0004", &platforms(&["A"]), TTL).await.unwrap();

    let results = BTreeMap::from([("A".to_string(), false)]);
    let finalized = coordinator.finalize_coordinated_migration(&record.migration_id, &results).await.unwrap();

    assert_eq!(finalized.status, CoordinationStatus::Failed);
    assert!(coordinator.get_version("A").await.unwrap().is_none());
}

#[rstest]
#[tokio::test]
async fn finalize_rejects_unknown_and_repeated_migrations(coordinator: LockCoordinator) {
    let results = BTreeMap::new();
    assert_matches!(
        coordinator.finalize_coordinated_migration("missing", &results).await,
        Err(CoordinationError::UnknownMigration(id)) if id == "missing"
    );

    let record = coordinator.coordinate_multi_platform_migration("0004", &platforms(&["A"]), TTL).await.unwrap();
    coordinator.finalize_coordinated_migration(&record.migration_id, &results).await.unwrap();
    assert_matches!(
        coordinator.finalize_coordinated_migration(&record.migration_id, &results).await,
        Err(CoordinationError::AlreadyFinalized(_))
    );
}

#[tokio::test(start_paused = true)]
async fn finalize_never_releases_a_lock_it_lost() {
    let coordinator = LockCoordinator::new(Arc::new(MemoryCoordinationStore::new()));
    let record =
        coordinator.coordinate_multi_platform_migration("0004", &platforms(&["A", "B"]), TTL).await.unwrap();

    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    let intruder = coordinator.acquire_lock("A", TTL).await.unwrap().expect("expired lock is free");

    let results = BTreeMap::from([("A".to_string(), true), ("B".to_string(), true)]);
    let result = coordinator.finalize_coordinated_migration(&record.migration_id, &results).await;

    assert_matches!(
        result,
        Err(CoordinationError::LockOwnershipLost { platforms: lost, .. }) if lost == platforms(&["A", "B"])
    );
    // the new holder keeps its lock
    assert!(coordinator.is_locked("A").await.unwrap());
    assert!(coordinator.release_lock("A", &intruder).await.unwrap());

    // every platform was still processed and the record persisted
    let saved = coordinator.get_coordination_record(&record.migration_id).await.unwrap().unwrap();
    assert_eq!(saved.status, CoordinationStatus::Completed);
    assert_eq!(coordinator.get_version("B").await.unwrap().unwrap().version, "0004");
}

#[rstest]
#[tokio::test]
async fn unreachable_store_is_a_transient_error() {
    let mut store = MockCoordinationStore::new();
    store
        .expect_set_if_absent()
        .returning(|_, _, _| Err(LockError::Connectivity("server selection timeout".to_string())));
    let coordinator = LockCoordinator::new(Arc::new(store));

    let result = coordinator.acquire_lock("tenant_acme", TTL).await;

    assert_matches!(result, Err(CoordinationError::Store(LockError::Connectivity(_))));
    assert!(result.unwrap_err().is_transient());
}

#[rstest]
#[tokio::test]
async fn store_failure_mid_admission_releases_earlier_locks() {
    let mut store = MockCoordinationStore::new();
    store.expect_set_if_absent().withf(|key, _, _| key == "lock:A").times(1).returning(|_, _, _| Ok(true));
    store
        .expect_set_if_absent()
        .withf(|key, _, _| key == "lock:B")
        .times(1)
        .returning(|_, _, _| Err(LockError::Store("write conflict".to_string())));
    store.expect_compare_and_delete().withf(|key, _| key == "lock:A").times(1).returning(|_, _| Ok(true));
    store.expect_hash_set().never();
    let coordinator = LockCoordinator::new(Arc::new(store));

    let result = coordinator.coordinate_multi_platform_migration("0004", &platforms(&["A", "B"]), TTL).await;

    assert_matches!(result, Err(CoordinationError::Store(LockError::Store(_))));
}

#[rstest]
#[tokio::test]
async fn finalize_releases_every_lock_when_registry_writes_fail() {
    let coordinator = LockCoordinator::new(Arc::new(HashOutageStore::new(VERSION_HISTORY_PREFIX)));
    let record = coordinator.coordinate_multi_platform_migration("0004", &platforms(&["A", "B"]), TTL).await.unwrap();
    let results = BTreeMap::from([("A".to_string(), true), ("B".to_string(), true)]);

    let result = coordinator.finalize_coordinated_migration(&record.migration_id, &results).await;

    assert_matches!(
        result,
        Err(CoordinationError::FinalizeIncomplete { failures, lost, .. })
            if failures.keys().cloned().collect::<Vec<_>>() == platforms(&["A", "B"]) && lost.is_empty()
    );
    assert!(!coordinator.is_locked("A").await.unwrap());
    assert!(!coordinator.is_locked("B").await.unwrap());

    let stored = coordinator.get_coordination_record(&record.migration_id).await.unwrap().unwrap();
    assert_eq!(stored.status, CoordinationStatus::Failed);
    assert_eq!(stored.registry_failures.len(), 2);
    assert!(stored.finalized_at.is_some());

    // a second finalize does not mistake the released locks for lost ones
    let again = coordinator.finalize_coordinated_migration(&record.migration_id, &results).await;
    assert_matches!(again, Err(CoordinationError::AlreadyFinalized(_)));
}

#[rstest]
#[tokio::test]
async fn unrepresentable_ttl_is_rejected_without_taking_the_lock(coordinator: LockCoordinator) {
    let result = coordinator.acquire_lock("tenant_acme", Duration::MAX).await;

    assert_matches!(result, Err(CoordinationError::Store(LockError::Store(_))));
    assert!(!coordinator.is_locked("tenant_acme").await.unwrap());
    assert!(coordinator.acquire_lock("tenant_acme", TTL).await.unwrap().is_some());
}
