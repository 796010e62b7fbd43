use clap::Args;

/// Parameters used to configure the coordination store.
#[derive(Debug, Clone, Args)]
pub struct CoordinationCliArgs {
    /// Use MongoDB as the coordination store
    #[arg(long)]
    pub mongodb: bool,

    /// Use an in-process coordination store, locks are not shared with other processes
    #[arg(long)]
    pub memory: bool,

    /// The connection string to the MongoDB server.
    #[arg(env = "TENANTDB_MONGODB_CONNECTION_URL", long, default_value = Some("mongodb://localhost:27017"))]
    pub mongodb_connection_url: Option<String>,

    /// The name of the database.
    #[arg(env = "TENANTDB_MONGODB_DATABASE_NAME", long, default_value = Some("tenantdb"))]
    pub mongodb_database_name: Option<String>,
}
