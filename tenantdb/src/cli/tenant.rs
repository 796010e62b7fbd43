use clap::Args;

#[derive(Debug, Clone, Args)]
pub struct TenantCliArgs {
    /// Tenant identifier: 1-48 characters of [A-Za-z0-9_-].
    #[arg(env = "TENANTDB_TENANT_ID", long = "tenant-id")]
    pub tenant_id: String,
}
