use clap::Args;

/// Backoff applied to transient connectivity failures.
#[derive(Debug, Clone, Args)]
pub struct RetryCliArgs {
    /// Total attempts, including the first one.
    #[arg(env = "TENANTDB_RETRY_ATTEMPTS", long, default_value_t = 3)]
    pub retry_attempts: u32,

    /// Delay before the first retry, doubled on each further one.
    #[arg(env = "TENANTDB_RETRY_BASE_DELAY_MS", long, default_value_t = 500)]
    pub retry_base_delay_ms: u64,
}
