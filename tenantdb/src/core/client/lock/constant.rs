/// Collection holding expiring keys (locks).
pub const LOCKS_COLLECTION: &str = "locks";

/// Collection holding hash fields, one document per (hash, field).
pub const HASHES_COLLECTION: &str = "hashes";

/// Prefix of lock keys, `lock:{platform}`.
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Hash holding the single current version pointer per platform.
pub const VERSION_POINTERS_HASH: &str = "schema_versions";

/// Prefix of per-platform append-only version history hashes.
pub const VERSION_HISTORY_PREFIX: &str = "schema_history:";

/// Prefix of per-platform backup checkpoint hashes.
pub const BACKUPS_PREFIX: &str = "backups:";

/// Hash holding coordinated multi-platform migration records.
pub const COORDINATION_HASH: &str = "coordinated_migrations";

/// Hash holding registered tenant endpoints.
pub const TENANT_ENDPOINTS_HASH: &str = "tenant_endpoints";
