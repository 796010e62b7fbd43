
use std::sync::Arc;
use std::time::Duration;

use rstest::*;

use crate::coordinator::LockCoordinator;
use crate::core::client::lock::memory::MemoryCoordinationStore;
use crate::core::client::lock::CoordinationStore;
use crate::health::{HealthConfig, HealthValidator};
use crate::provisioner::{ProvisionConfig, Provisioner};
use crate::registry::TenantRegistry;
use crate::schema::revisions::builtin_registry;
use crate::schema::{BackupLedger, SchemaManager};
use crate::types::instance::{ConnectionDescriptor, DatabaseInstance, InstanceStatus};
use crate::types::params::database::PostgresArgs;
use crate::utils::retry::RetryPolicy;
use fakes::{FakeCluster, FakeConnector};

pub const TEST_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

pub fn postgres_args() -> PostgresArgs {
    PostgresArgs {
        host: "pg.test".to_string(),
        admin_password: "admin-secret".to_string(),
        ..PostgresArgs::default()
    }
}

/// Retries without sleeping.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::ZERO)
}

/// Every component wired against a fake PostgreSQL cluster and an in-memory coordination store.
pub struct TestServices {
    pub cluster: Arc<FakeCluster>,
    pub connector: Arc<FakeConnector>,
    pub store: Arc<dyn CoordinationStore>,
    pub registry: TenantRegistry,
}

impl TestServices {
    pub fn coordinator(&self) -> &LockCoordinator {
        self.registry.coordinator()
    }

    pub fn schema(&self) -> &SchemaManager {
        self.registry.schema()
    }
}

pub struct TestServicesBuilder {
    provision: ProvisionConfig,
    health: HealthConfig,
    store: Option<Arc<dyn CoordinationStore>>,
}

impl Default for TestServicesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestServicesBuilder {
    pub fn new() -> Self {
        Self { provision: ProvisionConfig::default(), health: HealthConfig::default(), store: None }
    }

    pub fn adopt_existing(mut self) -> Self {
        self.provision.adopt_existing = true;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> TestServices {
        let cluster = Arc::new(FakeCluster::new());
        let connector = Arc::new(FakeConnector::new(cluster.clone()));
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryCoordinationStore::new()));
        let retry = fast_retry();
        let postgres = postgres_args();

        let registry = builtin_registry().expect("built-in registry is valid");
        let provisioner = Provisioner::new(connector.clone(), postgres.clone(), self.provision, retry);
        let schema = SchemaManager::new(connector.clone(), registry, Arc::new(BackupLedger::new(store.clone())))
            .with_retry(retry);
        let coordinator = LockCoordinator::new(store.clone());
        let health = HealthValidator::new(connector.clone(), self.health, retry);

        let registry = TenantRegistry::new(
            store.clone(),
            postgres,
            Arc::new(provisioner),
            Arc::new(schema),
            Arc::new(coordinator),
            Arc::new(health),
            TEST_LOCK_TIMEOUT,
        );
        TestServices { cluster, connector, store, registry }
    }
}

#[fixture]
pub fn services() -> TestServices {
    TestServicesBuilder::new().build()
}

/// Instance pointing at `database` on the fake server with admin credentials.
pub fn instance_on(tenant_id: &str, database: &str) -> DatabaseInstance {
    let connection: ConnectionDescriptor = postgres_args().descriptor_for(database, "postgres", "admin-secret");
    DatabaseInstance::new(tenant_id, &format!("{}_owner", database), connection, InstanceStatus::Existing)
}
