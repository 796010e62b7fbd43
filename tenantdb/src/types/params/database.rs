use crate::types::instance::ConnectionDescriptor;

/// Connection settings for the PostgreSQL server hosting tenant databases.
#[derive(Debug, Clone)]
pub struct PostgresArgs {
    pub host: String,
    pub port: u16,
    pub admin_user: String,
    pub admin_password: String,
    pub admin_database: String,
    pub ssl_mode: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl PostgresArgs {
    /// Descriptor of the administrative (maintenance) database.
    pub fn admin_descriptor(&self) -> ConnectionDescriptor {
        self.descriptor_for(&self.admin_database, &self.admin_user, &self.admin_password)
    }

    pub fn descriptor_for(&self, database: &str, username: &str, password: &str) -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: self.host.clone(),
            port: self.port,
            database: database.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            ssl_mode: self.ssl_mode.clone(),
        }
    }
}

impl Default for PostgresArgs {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            admin_user: "postgres".to_string(),
            admin_password: String::new(),
            admin_database: "postgres".to_string(),
            ssl_mode: None,
            max_connections: 5,
            acquire_timeout_secs: 10,
        }
    }
}
