use rusqlite::Connection;

use super::error::StorageError;

pub const PLANS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS plans (
    plan_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    max_users INTEGER NOT NULL,
    max_clients INTEGER NOT NULL,
    max_storage_gb REAL NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

// No foreign key on plan_id: tenants whose plan is deleted run on the fallback limits.
pub const TENANTS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    tenant_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    plan_id TEXT NOT NULL,
    status TEXT NOT NULL,
    storage_used_mb REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub const STAFF_USERS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS staff_users (
    user_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(tenant_id),
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    role TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

pub const CLIENTS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS clients (
    client_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(tenant_id),
    client_number TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(tenant_id, client_number)
);
"#;

pub const ATTACHMENTS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS attachments (
    attachment_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(tenant_id),
    file_name TEXT NOT NULL,
    size_mb REAL NOT NULL,
    created_at TEXT NOT NULL
);
"#;

pub const ID_PATTERNS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS id_patterns (
    tenant_id TEXT NOT NULL REFERENCES tenants(tenant_id),
    kind TEXT NOT NULL,
    pattern TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (tenant_id, kind)
);
"#;

pub const SEQUENCE_COUNTERS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sequence_counters (
    tenant_id TEXT NOT NULL REFERENCES tenants(tenant_id),
    kind TEXT NOT NULL,
    year INTEGER NOT NULL,
    value INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, kind, year)
);
"#;

pub const TENANT_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_staff_tenant ON staff_users(tenant_id);
CREATE INDEX IF NOT EXISTS idx_clients_tenant ON clients(tenant_id);
CREATE INDEX IF NOT EXISTS idx_attachments_tenant ON attachments(tenant_id);
"#;

pub fn init_database(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(PLANS_TABLE_SCHEMA)?;
    conn.execute_batch(TENANTS_TABLE_SCHEMA)?;
    conn.execute_batch(STAFF_USERS_TABLE_SCHEMA)?;
    conn.execute_batch(CLIENTS_TABLE_SCHEMA)?;
    conn.execute_batch(ATTACHMENTS_TABLE_SCHEMA)?;
    conn.execute_batch(ID_PATTERNS_TABLE_SCHEMA)?;
    conn.execute_batch(SEQUENCE_COUNTERS_TABLE_SCHEMA)?;
    conn.execute_batch(TENANT_INDEXES)?;
    Ok(())
}
