use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::types::health::HealthCheckResult;

/// Latest health report per tenant.
///
/// Holds at most `capacity` tenants; reports older than `window` are treated as absent and dropped
/// on the next access.
pub struct HealthReportCache {
    capacity: usize,
    window: Duration,
    entries: Mutex<HashMap<String, (Instant, HealthCheckResult)>>,
}

impl HealthReportCache {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self { capacity: capacity.max(1), window, entries: Mutex::new(HashMap::new()) }
    }

    pub async fn insert(&self, tenant_id: &str, report: HealthCheckResult) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, (stored_at, _)| now.duration_since(*stored_at) < self.window);

        if !entries.contains_key(tenant_id) && entries.len() >= self.capacity {
            let oldest = entries.iter().min_by_key(|(_, (stored_at, _))| *stored_at).map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(tenant_id.to_string(), (now, report));
    }

    pub async fn get(&self, tenant_id: &str) -> Option<HealthCheckResult> {
        let mut entries = self.entries.lock().await;
        let fresh = entries.get(tenant_id).is_some_and(|(stored_at, _)| stored_at.elapsed() < self.window);
        if !fresh {
            entries.remove(tenant_id);
            return None;
        }
        entries.get(tenant_id).map(|(_, report)| report.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
