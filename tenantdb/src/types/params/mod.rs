pub mod coordination;
pub mod database;

use std::time::Duration;

use crate::cli::coordination::CoordinationCliArgs;
use crate::cli::database::PostgresCliArgs;
use crate::cli::retry::RetryCliArgs;
use crate::cli::CommonArgs;
use crate::core::config::ConfigParams;
use crate::error::TenantDbError;
use crate::health::HealthConfig;
use crate::provisioner::ProvisionConfig;
use crate::utils::naming::normalize_tenant_id;
use crate::utils::retry::RetryPolicy;
use coordination::{CoordinationArgs, MongoArgs};
use database::PostgresArgs;

/// NOTE: The following implementations convert the command line arguments to the typed params the
/// clients are built from, validating them on the way.
impl TryFrom<PostgresCliArgs> for PostgresArgs {
    type Error = TenantDbError;
    fn try_from(args: PostgresCliArgs) -> Result<Self, Self::Error> {
        if args.pg_pool_size == 0 {
            return Err(TenantDbError::ConfigError("Pool size must be at least 1".to_string()));
        }
        Ok(Self {
            host: args.pg_host,
            port: args.pg_port,
            admin_user: args.pg_user,
            admin_password: args
                .pg_password
                .ok_or_else(|| TenantDbError::ConfigError("Postgres admin password is required".to_string()))?,
            admin_database: args.pg_admin_database,
            ssl_mode: args.pg_ssl_mode,
            max_connections: args.pg_pool_size,
            acquire_timeout_secs: args.pg_acquire_timeout_secs,
        })
    }
}

impl TryFrom<CoordinationCliArgs> for CoordinationArgs {
    type Error = TenantDbError;
    fn try_from(args: CoordinationCliArgs) -> Result<Self, Self::Error> {
        match (args.mongodb, args.memory) {
            (true, false) => Ok(CoordinationArgs::MongoDB(MongoArgs {
                connection_uri: args.mongodb_connection_url.ok_or_else(|| {
                    TenantDbError::ConfigError("MongoDB connection url is required".to_string())
                })?,
                database_name: args
                    .mongodb_database_name
                    .ok_or_else(|| TenantDbError::ConfigError("MongoDB database name is required".to_string()))?,
            })),
            (false, true) => Ok(CoordinationArgs::Memory),
            _ => Err(TenantDbError::ConfigError("Exactly one of --mongodb or --memory is required".to_string())),
        }
    }
}

impl TryFrom<RetryCliArgs> for RetryPolicy {
    type Error = TenantDbError;
    fn try_from(args: RetryCliArgs) -> Result<Self, Self::Error> {
        if args.retry_attempts == 0 {
            return Err(TenantDbError::ConfigError("Retry attempts must be at least 1".to_string()));
        }
        Ok(RetryPolicy::new(args.retry_attempts, Duration::from_millis(args.retry_base_delay_ms)))
    }
}

/// One week; longer locks only delay recovery from a crashed holder.
pub const MAX_LOCK_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

impl TryFrom<CommonArgs> for ConfigParams {
    type Error = TenantDbError;
    fn try_from(args: CommonArgs) -> Result<Self, Self::Error> {
        // the prefix ends up in DDL like tenant ids do
        if normalize_tenant_id(&args.name_prefix).as_deref() != Some(args.name_prefix.as_str()) {
            return Err(TenantDbError::ConfigError(format!("Invalid name prefix '{}'", args.name_prefix)));
        }
        if args.lock_timeout_secs == 0 || args.lock_timeout_secs > MAX_LOCK_TIMEOUT_SECS {
            return Err(TenantDbError::ConfigError(format!(
                "Lock timeout must be between 1 and {} seconds",
                MAX_LOCK_TIMEOUT_SECS
            )));
        }
        Ok(Self {
            postgres: args.postgres_args.try_into()?,
            coordination: args.coordination_args.try_into()?,
            provision: ProvisionConfig { prefix: args.name_prefix, ..ProvisionConfig::default() },
            health: HealthConfig::default(),
            retry: args.retry_args.try_into()?,
            lock_timeout: Duration::from_secs(args.lock_timeout_secs),
        })
    }
}
