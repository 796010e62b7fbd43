/// MongoDB settings for the coordination store.
#[derive(Debug, Clone)]
pub struct MongoArgs {
    pub connection_uri: String,
    pub database_name: String,
}

/// Which coordination store backs locks and the version registry.
#[derive(Debug, Clone)]
pub enum CoordinationArgs {
    MongoDB(MongoArgs),
    /// Process local store, only safe when a single process coordinates.
    Memory,
}
