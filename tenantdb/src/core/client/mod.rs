// Client abstractions module - contains the client interface traits and their implementations

pub mod database;
pub mod lock;

pub use database::postgres::PostgresConnector;
pub use database::{ClusterAdmin, DatabaseConnector, TargetDatabase};
pub use lock::memory::MemoryCoordinationStore;
pub use lock::mongodb::MongoCoordinationStore;
pub use lock::CoordinationStore;
