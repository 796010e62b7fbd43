pub mod cli;
pub mod coordinator;
pub mod core;
pub mod error;
pub mod health;
pub mod provisioner;
pub mod registry;
pub mod schema;
pub mod types;
pub mod utils;

#[cfg(test)]
pub mod tests;

// Re-export commonly used item
pub use error::{TenantDbError, TenantDbResult};
