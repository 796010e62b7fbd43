use clap::Args;

/// Parameters of the PostgreSQL server hosting tenant databases.
#[derive(Debug, Clone, Args)]
pub struct PostgresCliArgs {
    /// Host of the PostgreSQL server.
    #[arg(env = "TENANTDB_PG_HOST", long = "host", default_value = "localhost")]
    pub pg_host: String,

    #[arg(env = "TENANTDB_PG_PORT", long = "port", default_value_t = 5432)]
    pub pg_port: u16,

    /// Role with CREATEDB and CREATEROLE privileges.
    #[arg(env = "TENANTDB_PG_USER", long = "user", default_value = "postgres")]
    pub pg_user: String,

    #[arg(env = "TENANTDB_PG_PASSWORD", long = "password", hide_env_values = true)]
    pub pg_password: Option<String>,

    /// Maintenance database the admin role connects to.
    #[arg(env = "TENANTDB_PG_ADMIN_DATABASE", long = "admin-database", default_value = "postgres")]
    pub pg_admin_database: String,

    /// libpq sslmode, e.g. `require`.
    #[arg(env = "TENANTDB_PG_SSL_MODE", long = "ssl-mode")]
    pub pg_ssl_mode: Option<String>,

    /// Maximum connections per pool.
    #[arg(env = "TENANTDB_PG_POOL_SIZE", long = "pool-size", default_value_t = 5)]
    pub pg_pool_size: u32,

    #[arg(env = "TENANTDB_PG_ACQUIRE_TIMEOUT_SECS", long = "acquire-timeout-secs", default_value_t = 10)]
    pub pg_acquire_timeout_secs: u64,
}
