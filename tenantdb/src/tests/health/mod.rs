use std::sync::Arc;

use rstest::*;

use crate::core::client::database::{DatabaseError, MockDatabaseConnector, MockTargetDatabase, TargetDatabase};
use crate::health::{HealthConfig, HealthValidator};
use crate::tests::common::fakes::{FakeCluster, FakeConnector};
use crate::tests::common::{fast_retry, instance_on};
use crate::types::health::{CatalogStats, ConnectionMetrics, HealthStatus, SizeStats, SlowQuery};

/// A database with a healthy baseline; tests override single probes.
struct ProbeAnswers {
    catalog: CatalogStats,
    utilization: f64,
    slow_queries: Vec<SlowQuery>,
    database_bytes: i64,
    size_error: Option<String>,
}

impl Default for ProbeAnswers {
    fn default() -> Self {
        Self {
            catalog: CatalogStats { table_count: 6, constraint_count: 12, index_count: 9, has_version_table: true },
            utilization: 0.1,
            slow_queries: Vec::new(),
            database_bytes: 1024,
            size_error: None,
        }
    }
}

fn mock_database(answers: ProbeAnswers) -> MockTargetDatabase {
    let mut db = MockTargetDatabase::new();
    db.expect_ping().returning(|| Ok("PostgreSQL 16.2".to_string()));
    let catalog = answers.catalog.clone();
    db.expect_catalog_stats().returning(move || Ok(catalog.clone()));
    let utilization = answers.utilization;
    db.expect_connection_metrics().returning(move || {
        Ok(ConnectionMetrics {
            active_connections: 1,
            idle_connections: 0,
            total_connections: 1,
            max_connections: 100,
            utilization,
            pool_size: 1,
            pool_idle: 0,
        })
    });
    let slow = answers.slow_queries.clone();
    db.expect_slow_queries().returning(move |_, _| Ok(slow.clone()));
    let database_bytes = answers.database_bytes;
    let size_error = answers.size_error.clone();
    db.expect_size_stats().returning(move |_| match &size_error {
        Some(message) => Err(DatabaseError::Query(message.clone())),
        None => Ok(SizeStats { database_bytes, largest_tables: Vec::new() }),
    });
    db
}

fn validator_for(db: MockTargetDatabase) -> HealthValidator {
    let db: Arc<dyn TargetDatabase> = Arc::new(db);
    let mut connector = MockDatabaseConnector::new();
    connector.expect_connect().returning(move |_| Ok(db.clone()));
    HealthValidator::new(Arc::new(connector), HealthConfig::default(), fast_retry())
}

#[rstest]
#[tokio::test]
async fn healthy_database_is_healthy() {
    let validator = validator_for(mock_database(ProbeAnswers::default()));

    let result = validator.validate(&instance_on("acme", "tenant_acme")).await;

    assert_eq!(result.status, HealthStatus::Healthy);
    assert!(result.error.is_none());
    let details = result.details.expect("probes ran");
    assert_eq!(details.connectivity.details["server_version"], "PostgreSQL 16.2");
}

#[rstest]
#[tokio::test]
async fn database_without_tables_is_degraded() {
    let answers = ProbeAnswers {
        catalog: CatalogStats { table_count: 0, constraint_count: 0, index_count: 0, has_version_table: false },
        ..ProbeAnswers::default()
    };
    let validator = validator_for(mock_database(answers));

    let result = validator.validate(&instance_on("acme", "tenant_acme")).await;

    assert_eq!(result.status, HealthStatus::Degraded);
    assert_eq!(result.details.unwrap().schema.status, HealthStatus::Degraded);
}

#[rstest]
#[case(0.5, vec![], HealthStatus::Healthy)]
#[case(0.8, vec![], HealthStatus::Degraded)]
#[case(0.95, vec![], HealthStatus::Unhealthy)]
#[case(0.1, vec![SlowQuery { pid: 42, duration_ms: 9000, state: "active".to_string(), query: "SELECT pg_sleep(9)".to_string() }], HealthStatus::Degraded)]
#[tokio::test]
async fn performance_grading(#[case] utilization: f64, #[case] slow_queries: Vec<SlowQuery>, #[case] expected: HealthStatus) {
    let answers = ProbeAnswers { utilization, slow_queries, ..ProbeAnswers::default() };
    let validator = validator_for(mock_database(answers));

    let result = validator.validate(&instance_on("acme", "tenant_acme")).await;

    assert_eq!(result.details.unwrap().performance.status, expected);
    assert_eq!(result.status, expected);
}

#[rstest]
#[tokio::test]
async fn oversized_database_is_degraded() {
    let answers = ProbeAnswers { database_bytes: 11 * 1024 * 1024 * 1024, ..ProbeAnswers::default() };
    let validator = validator_for(mock_database(answers));

    let result = validator.validate(&instance_on("acme", "tenant_acme")).await;

    assert_eq!(result.status, HealthStatus::Degraded);
}

#[rstest]
#[tokio::test]
async fn failing_probe_is_unknown_not_fatal() {
    let answers = ProbeAnswers { size_error: Some("permission denied for pg_database_size".to_string()), ..ProbeAnswers::default() };
    let validator = validator_for(mock_database(answers));

    let result = validator.validate(&instance_on("acme", "tenant_acme")).await;

    let details = result.details.clone().expect("probes ran");
    assert_eq!(details.size.status, HealthStatus::Unknown);
    assert_eq!(details.connectivity.status, HealthStatus::Healthy);
    assert_eq!(result.status, HealthStatus::Unknown);
    assert!(result.error.unwrap().contains("permission denied"));
}

#[rstest]
#[tokio::test]
async fn unreachable_database_is_unhealthy_after_retries() {
    let mut connector = MockDatabaseConnector::new();
    connector
        .expect_connect()
        .times(3)
        .returning(|_| Err(DatabaseError::Connectivity("connection refused".to_string())));
    let validator = HealthValidator::new(Arc::new(connector), HealthConfig::default(), fast_retry());

    let result = validator.validate(&instance_on("acme", "tenant_acme")).await;

    assert_eq!(result.status, HealthStatus::Unhealthy);
    assert!(result.details.is_none());
    assert!(result.error.unwrap().contains("connection refused"));
}

#[rstest]
#[tokio::test]
async fn transient_connect_failure_is_retried() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.add_database("tenant_acme", "tenant_acme_owner");
    let connector = Arc::new(FakeConnector::new(cluster));
    connector.fail_next_connects(2);
    let validator = HealthValidator::new(connector.clone(), HealthConfig::default(), fast_retry());

    let result = validator.validate(&instance_on("acme", "tenant_acme")).await;

    assert_eq!(connector.connect_calls(), 3);
    // reachable, but the fake database has no tables yet
    assert_eq!(result.status, HealthStatus::Degraded);
}

#[rstest]
#[tokio::test]
async fn latest_report_is_cached_per_tenant() {
    let validator = validator_for(mock_database(ProbeAnswers::default()));
    assert!(validator.latest_report("acme").await.is_none());

    let result = validator.validate(&instance_on("acme", "tenant_acme")).await;

    assert_eq!(validator.latest_report("acme").await, Some(result));
    assert!(validator.latest_report("other").await.is_none());
}

#[rstest]
#[tokio::test]
async fn connection_metrics_are_reported_ungraded() {
    let validator = validator_for(mock_database(ProbeAnswers { utilization: 0.99, ..ProbeAnswers::default() }));

    let metrics = validator.get_connection_metrics(&instance_on("acme", "tenant_acme")).await.unwrap();

    assert_eq!(metrics.max_connections, 100);
    assert!((metrics.utilization - 0.99).abs() < f64::EPSILON);
}
