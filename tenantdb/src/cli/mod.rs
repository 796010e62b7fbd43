use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::cli::coordination::CoordinationCliArgs;
use crate::cli::database::PostgresCliArgs;
use crate::cli::retry::RetryCliArgs;
use crate::cli::tenant::TenantCliArgs;
use crate::error::TenantDbError;

pub mod coordination;
pub mod database;
pub mod retry;
pub mod tenant;

#[derive(Parser, Debug)]
#[command(
    name = "tenantdb",
    about = "Per-tenant PostgreSQL provisioning and schema migrations",
    long_about = "Provisions one database per tenant, applies versioned schema migrations under a distributed lock \
    and keeps a cross-platform registry of schema versions.\n\n\
    Every command prints exactly one JSON object on stdout and exits with 0 on success, 1 on failure. \
    Logs go to stderr.",
    after_help = "Examples:\n  \
    tenantdb create --memory --tenant-id acme --password secret\n  \
    tenantdb full-init --mongodb --tenant-id acme --seed-file seed.sql\n  \
    tenantdb migrate --mongodb --tenant-id acme --to head"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Like [`Parser::try_parse_from`], but usage errors become [`TenantDbError::ConfigError`] so they are
    /// reported like any other failure. `--help` and `--version` still print and exit through clap.
    pub fn parse_args<I, T>(args: I) -> Result<Self, TenantDbError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args).map_err(|e| match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => TenantDbError::ConfigError(e.render().to_string().trim_end().to_string()),
        })
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the tenant database and its owning role
    Create(CreateCmd),
    /// Bring the tenant schema to the latest revision
    InitSchema(TenantCmd),
    /// Run a SQL file against the tenant database in one transaction
    Seed(SeedCmd),
    /// Probe the tenant database
    Health(TenantCmd),
    /// create, init-schema, optional seed and health in one go
    FullInit(FullInitCmd),
    /// Migrate the tenant to a revision under its lock
    Migrate(MigrateCmd),
    /// Roll the tenant back to a revision under its lock
    Rollback(RollbackCmd),
    /// Show the tenant's schema revision, registry version and backups
    Status(TenantCmd),
    /// Drop the tenant database and role
    Delete(TenantCmd),
    /// List provisioned tenant databases
    List(CommonArgs),
    /// Compare the registered schema versions of all platforms
    Consistency(CommonArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Create(_) => "create",
            Commands::InitSchema(_) => "init-schema",
            Commands::Seed(_) => "seed",
            Commands::Health(_) => "health",
            Commands::FullInit(_) => "full-init",
            Commands::Migrate(_) => "migrate",
            Commands::Rollback(_) => "rollback",
            Commands::Status(_) => "status",
            Commands::Delete(_) => "delete",
            Commands::List(_) => "list",
            Commands::Consistency(_) => "consistency",
        }
    }

    pub fn common(&self) -> &CommonArgs {
        match self {
            Commands::Create(cmd) => &cmd.common,
            Commands::InitSchema(cmd) | Commands::Health(cmd) | Commands::Status(cmd) | Commands::Delete(cmd) => {
                &cmd.common
            }
            Commands::Seed(cmd) => &cmd.common,
            Commands::FullInit(cmd) => &cmd.common,
            Commands::Migrate(cmd) => &cmd.common,
            Commands::Rollback(cmd) => &cmd.common,
            Commands::List(common) | Commands::Consistency(common) => common,
        }
    }
}

/// Arguments shared by every command.
#[derive(Args, Debug, Clone)]
#[clap(
    group(
        ArgGroup::new("coordination")
            .args(&["mongodb", "memory"])
            .required(true)
            .multiple(false)
    )
)]
pub struct CommonArgs {
    #[command(flatten)]
    pub postgres_args: PostgresCliArgs,

    #[command(flatten)]
    pub coordination_args: CoordinationCliArgs,

    #[command(flatten)]
    pub retry_args: RetryCliArgs,

    /// Lock TTL in seconds, must outlast the slowest migration.
    #[arg(env = "TENANTDB_LOCK_TIMEOUT_SECS", long, default_value_t = 300)]
    pub lock_timeout_secs: u64,

    /// Prefix of tenant database and role names.
    #[arg(env = "TENANTDB_NAME_PREFIX", long, default_value = "tenant")]
    pub name_prefix: String,
}

#[derive(Args, Debug, Clone)]
pub struct TenantCmd {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub tenant_args: TenantCliArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CreateCmd {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub tenant_args: TenantCliArgs,

    /// Reuse the tenant database if it already exists
    #[arg(long)]
    pub adopt_existing: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SeedCmd {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub tenant_args: TenantCliArgs,

    /// SQL file to execute
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct FullInitCmd {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub tenant_args: TenantCliArgs,

    #[arg(long)]
    pub adopt_existing: bool,

    /// SQL file executed after the schema is initialized
    #[arg(long)]
    pub seed_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct MigrateCmd {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub tenant_args: TenantCliArgs,

    /// Target revision, or `head`
    #[arg(long = "to", default_value = "head")]
    pub target: String,
}

#[derive(Args, Debug, Clone)]
pub struct RollbackCmd {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub tenant_args: TenantCliArgs,

    /// Revision to roll back to
    #[arg(long = "to")]
    pub target: String,
}
