use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use tracing::{debug, warn};

use super::{ClusterAdmin, DatabaseConnector, DatabaseError, TargetDatabase, VERSION_TABLE};
use crate::types::health::{CatalogStats, ConnectionMetrics, SizeStats, SlowQuery, TableSize};
use crate::types::instance::{ConnectionDescriptor, InstanceSummary};
use crate::types::params::database::PostgresArgs;
use crate::utils::naming::{escape_like, quote_ident, quote_literal};

/// PostgreSQL connector.
///
/// Pools are created lazily on first use and shared by every caller in the process,
/// one pool per (server, database, role).
pub struct PostgresConnector {
    args: PostgresArgs,
    pools: Mutex<HashMap<String, PgPool>>,
}

impl PostgresConnector {
    pub fn new(args: PostgresArgs) -> Self {
        Self { args, pools: Mutex::new(HashMap::new()) }
    }

    fn connect_options(descriptor: &ConnectionDescriptor) -> Result<PgConnectOptions, DatabaseError> {
        let mut options = PgConnectOptions::new()
            .host(&descriptor.host)
            .port(descriptor.port)
            .username(&descriptor.username)
            .password(&descriptor.password)
            .database(&descriptor.database);
        if let Some(ssl_mode) = &descriptor.ssl_mode {
            let mode: PgSslMode = ssl_mode
                .parse()
                .map_err(|e| DatabaseError::Connectivity(format!("invalid ssl mode '{}': {}", ssl_mode, e)))?;
            options = options.ssl_mode(mode);
        }
        Ok(options)
    }

    fn pool(&self, descriptor: &ConnectionDescriptor) -> Result<PgPool, DatabaseError> {
        let key = descriptor.pool_key();
        let mut pools = self.pools.lock().map_err(|_| DatabaseError::Connectivity("pool registry poisoned".into()))?;
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }

        debug!(pool = %key, "Creating lazy connection pool");
        let pool = PgPoolOptions::new()
            .max_connections(self.args.max_connections)
            .acquire_timeout(Duration::from_secs(self.args.acquire_timeout_secs))
            .connect_lazy_with(Self::connect_options(descriptor)?);
        pools.insert(key, pool.clone());
        Ok(pool)
    }
}

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn TargetDatabase>, DatabaseError> {
        Ok(Arc::new(PostgresDatabase { pool: self.pool(descriptor)? }))
    }

    async fn cluster(&self) -> Result<Arc<dyn ClusterAdmin>, DatabaseError> {
        let admin = self.args.admin_descriptor();
        Ok(Arc::new(PostgresCluster { pool: self.pool(&admin)?, admin }))
    }
}

/// Administrative connection to the maintenance database.
pub struct PostgresCluster {
    pool: PgPool,
    admin: ConnectionDescriptor,
}

impl PostgresCluster {
    async fn exists(&self, sql: &str, name: &str) -> Result<bool, DatabaseError> {
        Ok(sqlx::query_scalar::<_, bool>(sql).bind(name).fetch_one(&self.pool).await?)
    }

    async fn run(&self, sql: &str) -> Result<(), DatabaseError> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterAdmin for PostgresCluster {
    async fn database_exists(&self, database: &str) -> Result<bool, DatabaseError> {
        self.exists("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)", database).await
    }

    async fn role_exists(&self, role: &str) -> Result<bool, DatabaseError> {
        self.exists("SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)", role).await
    }

    async fn create_role(&self, role: &str, password: &str) -> Result<(), DatabaseError> {
        self.run(&format!("CREATE ROLE {} WITH LOGIN PASSWORD {}", quote_ident(role), quote_literal(password))).await
    }

    async fn set_role_password(&self, role: &str, password: &str) -> Result<(), DatabaseError> {
        self.run(&format!("ALTER ROLE {} WITH LOGIN PASSWORD {}", quote_ident(role), quote_literal(password))).await
    }

    async fn create_database(&self, database: &str, owner: &str, encoding: &str) -> Result<(), DatabaseError> {
        // CREATE DATABASE cannot run inside a transaction block, raw_sql on the pool autocommits.
        self.run(&format!(
            "CREATE DATABASE {} OWNER {} ENCODING {} TEMPLATE template0",
            quote_ident(database),
            quote_ident(owner),
            quote_literal(encoding)
        ))
        .await
    }

    async fn set_database_timezone(&self, database: &str, timezone: &str) -> Result<(), DatabaseError> {
        self.run(&format!("ALTER DATABASE {} SET timezone TO {}", quote_ident(database), quote_literal(timezone))).await
    }

    async fn create_extensions(&self, database: &str, extensions: &[String]) -> Result<(), DatabaseError> {
        if extensions.is_empty() {
            return Ok(());
        }
        let mut descriptor = self.admin.clone();
        descriptor.database = database.to_string();
        let mut conn = PgConnection::connect_with(&PostgresConnector::connect_options(&descriptor)?).await?;
        for extension in extensions {
            (&mut conn).execute(sqlx::raw_sql(&format!("CREATE EXTENSION IF NOT EXISTS {}", quote_ident(extension)))).await?;
        }
        conn.close().await?;
        Ok(())
    }

    async fn terminate_sessions(&self, database: &str) -> Result<u64, DatabaseError> {
        let terminated = sqlx::query_scalar::<_, i64>(
            "SELECT count(pg_terminate_backend(pid)) FROM pg_stat_activity WHERE datname = $1 AND pid <> \
             pg_backend_pid()",
        )
        .bind(database)
        .fetch_one(&self.pool)
        .await?;
        Ok(terminated.max(0) as u64)
    }

    async fn drop_database(&self, database: &str) -> Result<(), DatabaseError> {
        self.run(&format!("DROP DATABASE IF EXISTS {}", quote_ident(database))).await
    }

    async fn drop_role(&self, role: &str) -> Result<(), DatabaseError> {
        self.run(&format!("DROP ROLE IF EXISTS {}", quote_ident(role))).await
    }

    async fn list_databases(&self, prefix: &str) -> Result<Vec<InstanceSummary>, DatabaseError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT d.datname::text, r.rolname::text FROM pg_database d JOIN pg_roles r ON r.oid = d.datdba WHERE \
             d.datname LIKE $1 ESCAPE '\\' ORDER BY d.datname",
        )
        .bind(format!("{}%", escape_like(prefix)))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(database_name, owner)| InstanceSummary { database_name, owner }).collect())
    }
}

/// Pooled access to one tenant database.
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    async fn count(&self, sql: &str) -> Result<i64, DatabaseError> {
        Ok(sqlx::query_scalar::<_, i64>(sql).fetch_one(&self.pool).await?)
    }

    async fn version_table_exists(&self) -> Result<bool, DatabaseError> {
        Ok(sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(format!("public.{}", VERSION_TABLE))
            .fetch_one(&self.pool)
            .await?)
    }
}

#[async_trait]
impl TargetDatabase for PostgresDatabase {
    async fn ping(&self) -> Result<String, DatabaseError> {
        Ok(sqlx::query_scalar::<_, String>("SELECT version()").fetch_one(&self.pool).await?)
    }

    async fn execute_script(&self, sql: &str) -> Result<(), DatabaseError> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn execute_in_transaction(&self, statements: &[String]) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        for statement in statements {
            if let Err(e) = (&mut *tx).execute(sqlx::raw_sql(statement)).await {
                let err = DatabaseError::from(e);
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Explicit rollback failed, the connection drop will abort the transaction");
                }
                return Err(match err {
                    DatabaseError::Connectivity(msg) => DatabaseError::Connectivity(msg),
                    other => DatabaseError::Transaction(other.to_string()),
                });
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn ensure_version_table(&self) -> Result<(), DatabaseError> {
        self.execute_script(&format!(
            "CREATE TABLE IF NOT EXISTS {} (version_num VARCHAR(64) NOT NULL PRIMARY KEY, applied_at TIMESTAMPTZ NOT \
             NULL DEFAULT now())",
            VERSION_TABLE
        ))
        .await
    }

    async fn current_revision(&self) -> Result<Option<String>, DatabaseError> {
        if !self.version_table_exists().await? {
            return Ok(None);
        }
        Ok(sqlx::query_scalar::<_, String>(&format!(
            "SELECT version_num FROM {} ORDER BY applied_at DESC LIMIT 1",
            VERSION_TABLE
        ))
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn version_row_count(&self) -> Result<i64, DatabaseError> {
        if !self.version_table_exists().await? {
            return Ok(0);
        }
        self.count(&format!("SELECT count(*) FROM {}", VERSION_TABLE)).await
    }

    async fn apply_revision(&self, statements: &[String], revision: &str) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let result: Result<(), sqlx::Error> = async {
            for statement in statements {
                (&mut *tx).execute(sqlx::raw_sql(statement)).await?;
            }
            sqlx::query(&format!("DELETE FROM {}", VERSION_TABLE)).execute(&mut *tx).await?;
            sqlx::query(&format!("INSERT INTO {} (version_num) VALUES ($1)", VERSION_TABLE))
                .bind(revision)
                .execute(&mut *tx)
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, revision, "Explicit rollback failed");
                }
                match DatabaseError::from(e) {
                    DatabaseError::Connectivity(msg) => Err(DatabaseError::Connectivity(msg)),
                    other => Err(DatabaseError::Transaction(other.to_string())),
                }
            }
        }
    }

    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT table_name::text FROM information_schema.tables WHERE table_schema = 'public' AND table_type = \
             'BASE TABLE' ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn catalog_stats(&self) -> Result<CatalogStats, DatabaseError> {
        Ok(CatalogStats {
            table_count: self
                .count(
                    "SELECT count(*) FROM information_schema.tables WHERE table_schema = 'public' AND table_type = \
                     'BASE TABLE'",
                )
                .await?,
            constraint_count: self
                .count("SELECT count(*) FROM information_schema.table_constraints WHERE table_schema = 'public'")
                .await?,
            index_count: self.count("SELECT count(*) FROM pg_indexes WHERE schemaname = 'public'").await?,
            has_version_table: self.version_table_exists().await?,
        })
    }

    async fn connection_metrics(&self) -> Result<ConnectionMetrics, DatabaseError> {
        let (active, idle, total) = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT count(*) FILTER (WHERE state = 'active'), count(*) FILTER (WHERE state = 'idle'), count(*) FROM \
             pg_stat_activity",
        )
        .fetch_one(&self.pool)
        .await?;
        let max_connections = sqlx::query_scalar::<_, i64>(
            "SELECT setting::bigint FROM pg_settings WHERE name = 'max_connections'",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ConnectionMetrics {
            active_connections: active,
            idle_connections: idle,
            total_connections: total,
            max_connections,
            utilization: ConnectionMetrics::utilization_of(total, max_connections),
            pool_size: self.pool.size(),
            pool_idle: self.pool.num_idle() as u32,
        })
    }

    async fn slow_queries(&self, threshold: Duration, limit: i64) -> Result<Vec<SlowQuery>, DatabaseError> {
        let rows = sqlx::query_as::<_, (i32, i64, String, String)>(
            "SELECT pid, (EXTRACT(EPOCH FROM (now() - query_start)) * 1000)::bigint AS duration_ms, \
             coalesce(state, ''), left(query, 200) FROM pg_stat_activity WHERE datname = current_database() AND \
             state <> 'idle' AND query_start IS NOT NULL AND pid <> pg_backend_pid() AND now() - query_start > \
             make_interval(secs => $1) ORDER BY duration_ms DESC LIMIT $2",
        )
        .bind(threshold.as_secs_f64())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(pid, duration_ms, state, query)| SlowQuery { pid, duration_ms, state, query })
            .collect())
    }

    async fn size_stats(&self, largest: i64) -> Result<SizeStats, DatabaseError> {
        let database_bytes = self.count("SELECT pg_database_size(current_database())").await?;
        let tables = sqlx::query_as::<_, (String, i64)>(
            "SELECT relname::text, pg_total_relation_size(relid) FROM pg_catalog.pg_statio_user_tables ORDER BY 2 \
             DESC LIMIT $1",
        )
        .bind(largest)
        .fetch_all(&self.pool)
        .await?;
        Ok(SizeStats {
            database_bytes,
            largest_tables: tables.into_iter().map(|(table, bytes)| TableSize { table, bytes }).collect(),
        })
    }
}
