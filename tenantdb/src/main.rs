use std::path::Path;
use std::process::ExitCode;

use anyhow::Context as _;
use dotenvy::dotenv;
use serde_json::{json, Value};
use tenantdb::cli::{Cli, Commands};
use tenantdb::core::config::{Config, ConfigParams};
use tenantdb::registry::TenantRegistry;
use tenantdb::types::health::{HealthCheckResult, HealthStatus};
use tenantdb::types::instance::{DatabaseInstance, InstanceStatus, InstanceUpdates};
use tenantdb::utils::logging::init_logging;
use tenantdb::{TenantDbError, TenantDbResult};
use tracing::{debug, error, info};

/// What a command prints, and whether it counts as a success.
struct CommandOutput {
    success: bool,
    result: Value,
}

impl CommandOutput {
    fn ok(result: Value) -> Self {
        Self { success: true, result }
    }

    fn with_success(success: bool, result: Value) -> Self {
        Self { success, result }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    init_logging();
    let cli = match Cli::parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => {
            error!(error = %e, "Invalid arguments");
            emit(&failure(Value::Null, &e));
            return ExitCode::FAILURE;
        }
    };
    let command = cli.command.name();
    debug!(command, "Starting tenantdb");

    let output = match run(cli.command).await {
        Ok(output) => {
            json!({ "success": output.success, "command": command, "result": output.result, "error": Value::Null })
        }
        Err(e) => {
            error!(command, error = %e, error_chain = ?e, "Command failed");
            failure(json!(command), &e)
        }
    };

    let success = output["success"].as_bool().unwrap_or(false);
    emit(&output);
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn failure(command: Value, e: &TenantDbError) -> Value {
    json!({
        "success": false,
        "command": command,
        "result": Value::Null,
        "error": { "kind": e.kind(), "message": e.to_string(), "transient": e.is_transient() },
    })
}

/// stdout carries exactly one JSON document per invocation.
#[allow(clippy::print_stdout)]
fn emit(output: &Value) {
    println!("{}", output);
}

async fn registry_for(params: ConfigParams) -> TenantDbResult<TenantRegistry> {
    let config = Config::setup(params).await?;
    config.tenant_registry()
}

async fn read_script(path: &Path) -> TenantDbResult<String> {
    let script = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read SQL file {}", path.display()))?;
    Ok(script)
}

/// Instance fields safe to print; the role password is only kept in the endpoint registry.
fn instance_json(instance: &DatabaseInstance) -> Value {
    json!({
        "tenant_id": instance.tenant_id,
        "database": instance.database_name,
        "role": instance.role_name,
        "host": instance.connection.host,
        "port": instance.connection.port,
        "status": instance.status,
        "created_at": instance.created_at,
    })
}

fn health_ok(result: &HealthCheckResult) -> bool {
    matches!(result.status, HealthStatus::Healthy | HealthStatus::Degraded)
}

async fn run(command: Commands) -> TenantDbResult<CommandOutput> {
    let mut params = ConfigParams::try_from(command.common().clone())?;

    match command {
        Commands::Create(cmd) => {
            params.provision.adopt_existing = cmd.adopt_existing;
            let registry = registry_for(params).await?;
            let instance = registry.provision_tenant(&cmd.tenant_args.tenant_id).await?;
            Ok(CommandOutput::ok(instance_json(&instance)))
        }
        Commands::InitSchema(cmd) => {
            let registry = registry_for(params).await?;
            let result = registry.migrate_tenant(&cmd.tenant_args.tenant_id, "head").await?;
            Ok(CommandOutput::with_success(result.is_success(), json!(result)))
        }
        Commands::Seed(cmd) => {
            let script = read_script(&cmd.file).await?;
            let registry = registry_for(params).await?;
            registry.seed_tenant(&cmd.tenant_args.tenant_id, &script).await?;
            Ok(CommandOutput::ok(json!({ "tenant_id": cmd.tenant_args.tenant_id, "file": cmd.file })))
        }
        Commands::Health(cmd) => {
            let registry = registry_for(params).await?;
            let result = registry.check_tenant_health(&cmd.tenant_args.tenant_id).await?;
            Ok(CommandOutput::with_success(health_ok(&result), json!(result)))
        }
        Commands::FullInit(cmd) => {
            params.provision.adopt_existing = cmd.adopt_existing;
            let script = match &cmd.seed_file {
                Some(path) => Some(read_script(path).await?),
                None => None,
            };
            let registry = registry_for(params).await?;
            full_init(&registry, &cmd.tenant_args.tenant_id, script.as_deref()).await
        }
        Commands::Migrate(cmd) => {
            let registry = registry_for(params).await?;
            let result = registry.migrate_tenant(&cmd.tenant_args.tenant_id, &cmd.target).await?;
            Ok(CommandOutput::with_success(result.is_success(), json!(result)))
        }
        Commands::Rollback(cmd) => {
            let registry = registry_for(params).await?;
            let result = registry.rollback_tenant(&cmd.tenant_args.tenant_id, &cmd.target).await?;
            Ok(CommandOutput::with_success(result.is_success(), json!(result)))
        }
        Commands::Status(cmd) => {
            let registry = registry_for(params).await?;
            let status = registry.get_tenant_migration_status(&cmd.tenant_args.tenant_id).await?;
            Ok(CommandOutput::ok(json!(status)))
        }
        Commands::Delete(cmd) => {
            let registry = registry_for(params).await?;
            registry.delete_tenant(&cmd.tenant_args.tenant_id).await?;
            Ok(CommandOutput::ok(json!({ "tenant_id": cmd.tenant_args.tenant_id, "deleted": true })))
        }
        Commands::List(_) => {
            let registry = registry_for(params).await?;
            let instances = registry.provisioner().list_instances().await?;
            Ok(CommandOutput::ok(json!({ "count": instances.len(), "instances": instances })))
        }
        Commands::Consistency(_) => {
            let registry = registry_for(params).await?;
            let report = registry.coordinator().check_consistency().await?;
            Ok(CommandOutput::with_success(report.is_consistent(), json!(report)))
        }
    }
}

/// create + init-schema + optional seed + health.
async fn full_init(registry: &TenantRegistry, tenant_id: &str, seed: Option<&str>) -> TenantDbResult<CommandOutput> {
    let mut instance = registry.provision_tenant(tenant_id).await?;
    let migration = registry.migrate_tenant(&instance.tenant_id, "head").await?;
    if !migration.is_success() {
        instance.apply(InstanceUpdates::new().update_status(InstanceStatus::Failed));
        return Ok(CommandOutput::with_success(
            false,
            json!({ "instance": instance_json(&instance), "migration": migration }),
        ));
    }

    let seeded = match seed {
        Some(script) => {
            if let Err(e) = registry.seed_tenant(&instance.tenant_id, script).await {
                error!(tenant_id = %instance.tenant_id, error = %e, "Seeding failed after the schema was initialized");
                instance.apply(InstanceUpdates::new().update_status(InstanceStatus::Failed));
                return Ok(CommandOutput::with_success(
                    false,
                    json!({
                        "instance": instance_json(&instance),
                        "migration": migration,
                        "seed_error": { "kind": e.kind(), "message": e.to_string() },
                    }),
                ));
            }
            true
        }
        None => false,
    };

    let health = registry.check_tenant_health(&instance.tenant_id).await?;
    info!(tenant_id = %instance.tenant_id, status = %health.status, "Tenant fully initialized");
    Ok(CommandOutput::with_success(
        health_ok(&health),
        json!({ "instance": instance_json(&instance), "migration": migration, "seeded": seeded, "health": health }),
    ))
}
