use serde::{Deserialize, Serialize};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    /// Strict precedence: any unhealthy, then any degraded, then all healthy, else unknown.
    pub fn reduce<I>(statuses: I) -> HealthStatus
    where
        I: IntoIterator<Item = HealthStatus>,
    {
        let statuses: Vec<HealthStatus> = statuses.into_iter().collect();
        if statuses.is_empty() {
            return HealthStatus::Unknown;
        }
        if statuses.contains(&HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if statuses.contains(&HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else if statuses.iter().all(|s| *s == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unknown
        }
    }
}

/// Outcome of one probe inside a health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub details: serde_json::Value,
}

impl ProbeResult {
    pub fn new(status: HealthStatus, details: serde_json::Value) -> Self {
        Self { status, error: None, details }
    }

    pub fn failed(status: HealthStatus, error: impl Into<String>) -> Self {
        Self { status, error: Some(error.into()), details: serde_json::Value::Null }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeDetails {
    pub connectivity: ProbeResult,
    pub schema: ProbeResult,
    pub performance: ProbeResult,
    pub size: ProbeResult,
}

impl ProbeDetails {
    pub fn statuses(&self) -> [HealthStatus; 4] {
        [self.connectivity.status, self.schema.status, self.performance.status, self.size.status]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ProbeDetails>,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

/// Point-in-time connection usage of one database server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active_connections: i64,
    pub idle_connections: i64,
    pub total_connections: i64,
    pub max_connections: i64,
    pub utilization: f64,
    pub pool_size: u32,
    pub pool_idle: u32,
}

impl ConnectionMetrics {
    pub fn utilization_of(total: i64, max: i64) -> f64 {
        if max <= 0 {
            0.0
        } else {
            total as f64 / max as f64
        }
    }
}

/// Catalog counts for one database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub table_count: i64,
    pub constraint_count: i64,
    pub index_count: i64,
    pub has_version_table: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowQuery {
    pub pid: i32,
    pub duration_ms: i64,
    pub state: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSize {
    pub table: String,
    pub bytes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeStats {
    pub database_bytes: i64,
    pub largest_tables: Vec<TableSize>,
}
