use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// How to reach one PostgreSQL database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<String>,
}

impl ConnectionDescriptor {
    /// Connection url in libpq form. The password is included.
    pub fn to_url(&self) -> String {
        let mut url = format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        );
        if let Some(ssl_mode) = &self.ssl_mode {
            url.push_str("?sslmode=");
            url.push_str(ssl_mode);
        }
        url
    }

    /// Key used to share one pool per (server, database, role).
    pub fn pool_key(&self) -> String {
        format!("{}@{}:{}/{}", self.username, self.host, self.port, self.database)
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstanceStatus {
    Created,
    Existing,
    Failed,
}

/// A provisioned tenant database together with its owning role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInstance {
    pub tenant_id: String,
    pub database_name: String,
    pub role_name: String,
    pub connection: ConnectionDescriptor,
    pub created_at: DateTime<Utc>,
    pub status: InstanceStatus,
}

impl DatabaseInstance {
    pub fn new(tenant_id: &str, role_name: &str, connection: ConnectionDescriptor, status: InstanceStatus) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            database_name: connection.database.clone(),
            role_name: role_name.to_string(),
            connection,
            created_at: Utc::now().round_subsecs(0),
            status,
        }
    }

    /// Platform name under which this instance is locked and versioned.
    pub fn platform(&self) -> String {
        tenant_platform(&self.tenant_id)
    }

    /// Applies a typed patch. Only the status is mutable after creation.
    pub fn apply(&mut self, updates: InstanceUpdates) {
        if let Some(status) = updates.status {
            self.status = status;
        }
    }
}

/// Platform name for a tenant database.
pub fn tenant_platform(tenant_id: &str) -> String {
    format!("tenant_{}", tenant_id)
}

/// Fields of a [`DatabaseInstance`] that may change after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceUpdates {
    pub status: Option<InstanceStatus>,
}

impl InstanceUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_status(mut self, status: InstanceStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Fields of a registered tenant endpoint that may be changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantEndpointUpdates {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `Some(None)` clears the ssl mode.
    pub ssl_mode: Option<Option<String>>,
}

impl TenantEndpointUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn update_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn update_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn update_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn update_ssl_mode(mut self, ssl_mode: Option<String>) -> Self {
        self.ssl_mode = Some(ssl_mode);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(self, descriptor: &mut ConnectionDescriptor) {
        if let Some(host) = self.host {
            descriptor.host = host;
        }
        if let Some(port) = self.port {
            descriptor.port = port;
        }
        if let Some(database) = self.database {
            descriptor.database = database;
        }
        if let Some(username) = self.username {
            descriptor.username = username;
        }
        if let Some(password) = self.password {
            descriptor.password = password;
        }
        if let Some(ssl_mode) = self.ssl_mode {
            descriptor.ssl_mode = ssl_mode;
        }
    }
}

/// One row of [`crate::provisioner::Provisioner::list_instances`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub database_name: String,
    pub owner: String,
}
