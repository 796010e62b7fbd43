pub mod error;

use std::sync::Arc;

use tracing::{debug, info, warn};

pub use error::ProvisionError;

use crate::core::client::database::{ClusterAdmin, DatabaseConnector, DatabaseError};
use crate::types::instance::{DatabaseInstance, InstanceStatus, InstanceSummary};
use crate::types::params::database::PostgresArgs;
use crate::utils::naming::{database_name, generate_password, normalize_tenant_id, role_name};
use crate::utils::retry::RetryPolicy;

/// How tenant databases are named and configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionConfig {
    pub prefix: String,
    pub encoding: String,
    pub timezone: String,
    pub extensions: Vec<String>,
    /// Reuse a database that already exists instead of failing with a conflict.
    pub adopt_existing: bool,
    pub password_length: usize,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            prefix: "tenant".to_string(),
            encoding: "UTF8".to_string(),
            timezone: "UTC".to_string(),
            extensions: vec!["uuid-ossp".to_string(), "pgcrypto".to_string(), "pg_trgm".to_string()],
            adopt_existing: false,
            password_length: 32,
        }
    }
}

impl ProvisionConfig {
    pub fn with_adopt_existing(mut self, adopt_existing: bool) -> Self {
        self.adopt_existing = adopt_existing;
        self
    }
}

/// Creates and removes one database plus one owning role per tenant.
pub struct Provisioner {
    connector: Arc<dyn DatabaseConnector>,
    postgres: PostgresArgs,
    config: ProvisionConfig,
    retry: RetryPolicy,
}

impl Provisioner {
    pub fn new(
        connector: Arc<dyn DatabaseConnector>,
        postgres: PostgresArgs,
        config: ProvisionConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self { connector, postgres, config, retry }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// `(tenant, database, role)` for a raw tenant id.
    pub fn names_for(&self, tenant_id: &str) -> Result<(String, String, String), ProvisionError> {
        let tenant = normalize_tenant_id(tenant_id).ok_or_else(|| ProvisionError::InvalidTenantId(tenant_id.to_string()))?;
        let database = database_name(&self.config.prefix, &tenant);
        let role = role_name(&self.config.prefix, &tenant);
        Ok((tenant, database, role))
    }

    async fn cluster(&self) -> Result<Arc<dyn ClusterAdmin>, DatabaseError> {
        self.retry.run("cluster", || self.connector.cluster()).await
    }

    pub async fn create_instance(&self, tenant_id: &str) -> Result<DatabaseInstance, ProvisionError> {
        let (tenant, database, role) = self.names_for(tenant_id)?;
        let cluster = self.cluster().await?;
        let retry = &self.retry;

        let exists = retry.run("database_exists", || cluster.database_exists(&database)).await?;
        if exists && !self.config.adopt_existing {
            warn!(tenant_id = %tenant, database = %database, "Tenant database already exists");
            return Err(ProvisionError::Conflict { database });
        }

        let password = generate_password(self.config.password_length);
        // a role this call did not create keeps its password until the database is ours
        let created_role = if retry.run("role_exists", || cluster.role_exists(&role)).await? {
            false
        } else {
            match retry.run("create_role", || cluster.create_role(&role, &password)).await {
                Ok(()) => true,
                // created concurrently, or by an attempt whose response was lost
                Err(DatabaseError::Duplicate(_)) => false,
                Err(e) => return Err(e.into()),
            }
        };

        let status = if exists {
            info!(tenant_id = %tenant, database = %database, "Adopting existing tenant database");
            InstanceStatus::Existing
        } else {
            match retry.run("create_database", || cluster.create_database(&database, &role, &self.config.encoding)).await
            {
                Ok(()) => InstanceStatus::Created,
                Err(DatabaseError::Duplicate(_)) => {
                    warn!(tenant_id = %tenant, database = %database, "Tenant database created concurrently");
                    return Err(ProvisionError::Conflict { database });
                }
                Err(e) => return Err(e.into()),
            }
        };

        if !created_role {
            debug!(role = %role, "Role exists, rotating its password");
            retry.run("set_role_password", || cluster.set_role_password(&role, &password)).await?;
        }

        retry.run("set_database_timezone", || cluster.set_database_timezone(&database, &self.config.timezone)).await?;
        retry.run("create_extensions", || cluster.create_extensions(&database, &self.config.extensions)).await?;

        let connection = self.postgres.descriptor_for(&database, &role, &password);
        info!(tenant_id = %tenant, database = %database, role = %role, status = %status, "🏗️  Tenant database provisioned");
        Ok(DatabaseInstance::new(&tenant, &role, connection, status))
    }

    /// Removes the database and its role. Missing objects count as already deleted.
    pub async fn delete_instance(&self, instance: &DatabaseInstance) -> Result<(), ProvisionError> {
        let cluster = self.cluster().await?;
        let retry = &self.retry;
        let database = instance.database_name.as_str();

        let terminated = retry.run("terminate_sessions", || cluster.terminate_sessions(database)).await?;
        if terminated > 0 {
            debug!(database, terminated, "Terminated open sessions");
        }
        retry.run("drop_database", || cluster.drop_database(database)).await?;
        retry.run("drop_role", || cluster.drop_role(&instance.role_name)).await?;

        info!(tenant_id = %instance.tenant_id, database, "🗑️  Tenant database deleted");
        Ok(())
    }

    /// Databases following the naming convention, with their owner.
    pub async fn list_instances(&self) -> Result<Vec<InstanceSummary>, ProvisionError> {
        let cluster = self.cluster().await?;
        let prefix = format!("{}_", self.config.prefix);
        Ok(self.retry.run("list_databases", || cluster.list_databases(&prefix)).await?)
    }

    /// Rebuilds the instance of an already provisioned tenant.
    ///
    /// The tenant role's password is not recoverable, so the connection uses the admin credentials
    /// on the tenant database.
    pub async fn instance_for(&self, tenant_id: &str) -> Result<DatabaseInstance, ProvisionError> {
        let (tenant, database, role) = self.names_for(tenant_id)?;
        let cluster = self.cluster().await?;
        if !self.retry.run("database_exists", || cluster.database_exists(&database)).await? {
            return Err(ProvisionError::NotFound(database));
        }
        let connection = self.postgres.descriptor_for(&database, &self.postgres.admin_user, &self.postgres.admin_password);
        Ok(DatabaseInstance::new(&tenant, &role, connection, InstanceStatus::Existing))
    }

    /// Issues a new password for the instance's role.
    pub async fn rotate_credentials(&self, instance: &DatabaseInstance) -> Result<DatabaseInstance, ProvisionError> {
        let cluster = self.cluster().await?;
        let password = generate_password(self.config.password_length);
        self.retry.run("set_role_password", || cluster.set_role_password(&instance.role_name, &password)).await?;

        let mut rotated = instance.clone();
        rotated.connection =
            self.postgres.descriptor_for(&instance.database_name, &instance.role_name, &password);
        info!(tenant_id = %instance.tenant_id, role = %instance.role_name, "🔑 Credentials rotated");
        Ok(rotated)
    }
}
