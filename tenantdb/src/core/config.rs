use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::coordinator::LockCoordinator;
use crate::core::client::database::postgres::PostgresConnector;
use crate::core::client::database::DatabaseConnector;
use crate::core::client::lock::memory::MemoryCoordinationStore;
use crate::core::client::lock::mongodb::MongoCoordinationStore;
use crate::core::client::lock::CoordinationStore;
use crate::error::TenantDbResult;
use crate::health::{HealthConfig, HealthValidator};
use crate::provisioner::{ProvisionConfig, Provisioner};
use crate::registry::TenantRegistry;
use crate::schema::revisions::builtin_registry;
use crate::schema::{BackupLedger, SchemaManager};
use crate::types::params::coordination::CoordinationArgs;
use crate::types::params::database::PostgresArgs;
use crate::utils::retry::RetryPolicy;

/// Default lock TTL, long enough to cover the slowest migration.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// Validated settings the clients are built from.
#[derive(Debug, Clone)]
pub struct ConfigParams {
    pub postgres: PostgresArgs,
    pub coordination: CoordinationArgs,
    pub provision: ProvisionConfig,
    pub health: HealthConfig,
    pub retry: RetryPolicy,
    pub lock_timeout: Duration,
}

/// Shared clients and settings. Pools inside the clients are process wide and created lazily.
pub struct Config {
    postgres: PostgresArgs,
    provision: ProvisionConfig,
    health: HealthConfig,
    retry: RetryPolicy,
    lock_timeout: Duration,
    store: Arc<dyn CoordinationStore>,
    connector: Arc<dyn DatabaseConnector>,
}

impl Config {
    /// Create a new config from already built clients
    pub fn new(params: ConfigParams, store: Arc<dyn CoordinationStore>, connector: Arc<dyn DatabaseConnector>) -> Self {
        Self {
            postgres: params.postgres,
            provision: params.provision,
            health: params.health,
            retry: params.retry,
            lock_timeout: params.lock_timeout,
            store,
            connector,
        }
    }

    /// Builds the clients described by `params`.
    pub async fn setup(params: ConfigParams) -> TenantDbResult<Self> {
        let store: Arc<dyn CoordinationStore> = match &params.coordination {
            CoordinationArgs::MongoDB(args) => {
                info!(database = %args.database_name, "Using MongoDB coordination store");
                Arc::new(MongoCoordinationStore::new(args).await?)
            }
            CoordinationArgs::Memory => {
                info!("Using in-process coordination store");
                Arc::new(MemoryCoordinationStore::new())
            }
        };
        let connector = Arc::new(PostgresConnector::new(params.postgres.clone()));
        Ok(Self::new(params, store, connector))
    }

    pub fn postgres(&self) -> &PostgresArgs {
        &self.postgres
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        self.store.clone()
    }

    pub fn connector(&self) -> Arc<dyn DatabaseConnector> {
        self.connector.clone()
    }

    /// Wires every component on top of the shared clients.
    pub fn tenant_registry(&self) -> TenantDbResult<TenantRegistry> {
        let provisioner =
            Provisioner::new(self.connector.clone(), self.postgres.clone(), self.provision.clone(), self.retry);
        let backups = Arc::new(BackupLedger::new(self.store.clone()));
        let schema =
            SchemaManager::new(self.connector.clone(), builtin_registry()?, backups).with_retry(self.retry);
        let coordinator = LockCoordinator::new(self.store.clone());
        let health = HealthValidator::new(self.connector.clone(), self.health.clone(), self.retry);

        Ok(TenantRegistry::new(
            self.store.clone(),
            self.postgres.clone(),
            Arc::new(provisioner),
            Arc::new(schema),
            Arc::new(coordinator),
            Arc::new(health),
            self.lock_timeout,
        ))
    }
}
