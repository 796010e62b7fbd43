//! Schema revisions shipped with this build.

use super::error::MigrationError;
use super::registry::{Migration, MigrationRegistry};

/// Idempotent objects every tenant database carries regardless of revision.
pub const BASELINE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tenant_settings (
    key VARCHAR(128) PRIMARY KEY,
    value JSONB NOT NULL DEFAULT '{}'::jsonb,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

pub fn builtin_migrations() -> Vec<Migration> {
    vec![
        Migration::new("0001", None, "customers and service plans")
            .up("CREATE TABLE IF NOT EXISTS service_plans (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name VARCHAR(128) NOT NULL UNIQUE,
                download_mbps INTEGER NOT NULL,
                upload_mbps INTEGER NOT NULL,
                monthly_price NUMERIC(10, 2) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )")
            .up("CREATE TABLE IF NOT EXISTS customers (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                account_number VARCHAR(32) NOT NULL UNIQUE,
                full_name VARCHAR(255) NOT NULL,
                email VARCHAR(255),
                phone VARCHAR(32),
                service_plan_id UUID REFERENCES service_plans(id),
                status VARCHAR(16) NOT NULL DEFAULT 'active',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )")
            .up("CREATE INDEX IF NOT EXISTS idx_customers_status ON customers (status)")
            .down("DROP TABLE IF EXISTS customers")
            .down("DROP TABLE IF EXISTS service_plans"),
        Migration::new("0002", Some("0001"), "network devices")
            .up("CREATE TABLE IF NOT EXISTS network_devices (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                hostname VARCHAR(255) NOT NULL,
                management_ip INET NOT NULL UNIQUE,
                device_type VARCHAR(32) NOT NULL,
                snmp_community VARCHAR(64),
                customer_id UUID REFERENCES customers(id) ON DELETE SET NULL,
                last_seen_at TIMESTAMPTZ
            )")
            .up("CREATE INDEX IF NOT EXISTS idx_network_devices_customer ON network_devices (customer_id)")
            .down("DROP TABLE IF EXISTS network_devices"),
        Migration::new("0003", Some("0002"), "field work orders")
            .up("CREATE TABLE IF NOT EXISTS work_orders (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                customer_id UUID NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
                kind VARCHAR(32) NOT NULL,
                priority SMALLINT NOT NULL DEFAULT 3,
                status VARCHAR(16) NOT NULL DEFAULT 'open',
                assigned_to VARCHAR(128),
                scheduled_for TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )")
            .up("CREATE INDEX IF NOT EXISTS idx_work_orders_status ON work_orders (status, priority)")
            .down("DROP TABLE IF EXISTS work_orders"),
        Migration::new("0004", Some("0003"), "customer geolocation")
            .up("ALTER TABLE customers ADD COLUMN IF NOT EXISTS latitude DOUBLE PRECISION")
            .up("ALTER TABLE customers ADD COLUMN IF NOT EXISTS longitude DOUBLE PRECISION")
            .down("ALTER TABLE customers DROP COLUMN IF EXISTS longitude")
            .down("ALTER TABLE customers DROP COLUMN IF EXISTS latitude"),
    ]
}

pub fn builtin_registry() -> Result<MigrationRegistry, MigrationError> {
    MigrationRegistry::new(builtin_migrations())
}
