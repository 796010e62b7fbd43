pub mod cache;
pub mod error;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

pub use cache::HealthReportCache;
pub use error::HealthError;

use crate::core::client::database::{DatabaseConnector, DatabaseError, TargetDatabase};
use crate::types::health::{ConnectionMetrics, HealthCheckResult, HealthStatus, ProbeDetails, ProbeResult};
use crate::types::instance::DatabaseInstance;
use crate::utils::retry::RetryPolicy;

/// Thresholds used to grade probe results.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Connection utilization above which the database is degraded.
    pub degraded_utilization: f64,
    /// Connection utilization above which the database is unhealthy.
    pub unhealthy_utilization: f64,
    pub slow_query_threshold: Duration,
    pub slow_query_sample: i64,
    pub max_database_bytes: i64,
    pub largest_tables: i64,
    pub cache_capacity: usize,
    pub cache_window: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_utilization: 0.75,
            unhealthy_utilization: 0.9,
            slow_query_threshold: Duration::from_secs(5),
            slow_query_sample: 5,
            max_database_bytes: 10 * 1024 * 1024 * 1024,
            largest_tables: 5,
            cache_capacity: 1024,
            cache_window: Duration::from_secs(300),
        }
    }
}

/// Probes one database at a time and grades it.
pub struct HealthValidator {
    connector: Arc<dyn DatabaseConnector>,
    config: HealthConfig,
    retry: RetryPolicy,
    cache: HealthReportCache,
}

impl HealthValidator {
    pub fn new(connector: Arc<dyn DatabaseConnector>, config: HealthConfig, retry: RetryPolicy) -> Self {
        let cache = HealthReportCache::new(config.cache_capacity, config.cache_window);
        Self { connector, config, retry, cache }
    }

    /// Runs all probes and reduces them to one status. Never fails: errors end up in the result.
    pub async fn validate(&self, instance: &DatabaseInstance) -> HealthCheckResult {
        let started = Instant::now();
        let database = instance.database_name.as_str();

        let outcome = self
            .retry
            .run("health_check", move || async move {
                let db = self.connector.connect(&instance.connection).await?;
                self.run_probes(db.as_ref()).await
            })
            .await;

        let response_time_ms = started.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(details) => {
                let status = HealthStatus::reduce(details.statuses());
                let error = [&details.connectivity, &details.schema, &details.performance, &details.size]
                    .iter()
                    .find_map(|probe| probe.error.clone());
                HealthCheckResult { status, response_time_ms, error, details: Some(details), checked_at: Utc::now() }
            }
            Err(e) => {
                warn!(database, error = %e, "Database unreachable during health check");
                HealthCheckResult {
                    status: HealthStatus::Unhealthy,
                    response_time_ms,
                    error: Some(e.to_string()),
                    details: None,
                    checked_at: Utc::now(),
                }
            }
        };

        info!(database, status = %result.status, response_time_ms, "Health check completed");
        self.cache.insert(&instance.tenant_id, result.clone()).await;
        result
    }

    /// Pool and server connection usage, without grading.
    pub async fn get_connection_metrics(&self, instance: &DatabaseInstance) -> Result<ConnectionMetrics, HealthError> {
        let db = self.retry.run("connect", || self.connector.connect(&instance.connection)).await?;
        Ok(db.connection_metrics().await?)
    }

    /// Last report of `tenant_id` if it is still inside the cache window.
    pub async fn latest_report(&self, tenant_id: &str) -> Option<HealthCheckResult> {
        self.cache.get(tenant_id).await
    }

    /// A transient connectivity failure is returned as an error so the whole check is retried.
    async fn run_probes(&self, db: &dyn TargetDatabase) -> Result<ProbeDetails, DatabaseError> {
        let (connectivity, schema, performance, size) = tokio::join!(
            self.probe_connectivity(db),
            self.probe_schema(db),
            self.probe_performance(db),
            self.probe_size(db),
        );

        let connectivity = match connectivity {
            Ok(probe) => probe,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => ProbeResult::failed(HealthStatus::Unhealthy, e.to_string()),
        };

        Ok(ProbeDetails {
            connectivity,
            schema: settle("schema", schema),
            performance: settle("performance", performance),
            size: settle("size", size),
        })
    }

    async fn probe_connectivity(&self, db: &dyn TargetDatabase) -> Result<ProbeResult, DatabaseError> {
        let started = Instant::now();
        let server_version = db.ping().await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        Ok(ProbeResult::new(HealthStatus::Healthy, json!({ "server_version": server_version, "latency_ms": latency_ms })))
    }

    async fn probe_schema(&self, db: &dyn TargetDatabase) -> Result<ProbeResult, DatabaseError> {
        let stats = db.catalog_stats().await?;
        let details = serde_json::to_value(&stats).unwrap_or_default();

        let probe = if stats.table_count == 0 {
            ProbeResult { status: HealthStatus::Degraded, error: Some("database has no tables".to_string()), details }
        } else if !stats.has_version_table {
            ProbeResult { status: HealthStatus::Degraded, error: Some("schema version table missing".to_string()), details }
        } else {
            ProbeResult::new(HealthStatus::Healthy, details)
        };
        Ok(probe)
    }

    async fn probe_performance(&self, db: &dyn TargetDatabase) -> Result<ProbeResult, DatabaseError> {
        let metrics = db.connection_metrics().await?;
        let slow = db.slow_queries(self.config.slow_query_threshold, self.config.slow_query_sample).await?;

        let status = if metrics.utilization > self.config.unhealthy_utilization {
            HealthStatus::Unhealthy
        } else if metrics.utilization > self.config.degraded_utilization || !slow.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Ok(ProbeResult::new(status, json!({ "connections": metrics, "slow_queries": slow })))
    }

    async fn probe_size(&self, db: &dyn TargetDatabase) -> Result<ProbeResult, DatabaseError> {
        let stats = db.size_stats(self.config.largest_tables).await?;
        let status = if stats.database_bytes > self.config.max_database_bytes {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Ok(ProbeResult::new(status, serde_json::to_value(&stats).unwrap_or_default()))
    }
}

fn settle(probe: &str, result: Result<ProbeResult, DatabaseError>) -> ProbeResult {
    result.unwrap_or_else(|e| {
        debug!(probe, error = %e, "Health probe failed");
        ProbeResult::failed(HealthStatus::Unknown, e.to_string())
    })
}
