use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::quota::{Plan, PlanLimits, PlanStore, Tenant, TenantStatus, TenantStore, UNLIMITED};

use super::error::StorageError;
use super::schema::init_database;
use super::CLINIC_DB_FILENAME;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffUserRecord {
    pub user_id: String,
    pub tenant_id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: String,
    pub tenant_id: String,
    pub client_number: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub attachment_id: String,
    pub tenant_id: String,
    pub file_name: String,
    pub size_mb: f64,
    pub created_at: String,
}

pub struct ClinicDatabase {
    data_dir: PathBuf,
    conn: Mutex<Connection>,
}

impl ClinicDatabase {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join(CLINIC_DB_FILENAME);
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        init_database(&conn)?;

        Ok(Self {
            data_dir,
            conn: Mutex::new(conn),
        })
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::InvalidValue("connection poisoned".into()))
    }

    pub fn upsert_plan(&self, plan: &Plan) -> Result<(), StorageError> {
        validate_limits(&plan.limits)?;
        if plan.plan_id.trim().is_empty() {
            return Err(StorageError::InvalidValue("plan_id cannot be empty".into()));
        }

        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO plans (plan_id, name, max_users, max_clients, max_storage_gb, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(plan_id) DO UPDATE SET
                name = excluded.name,
                max_users = excluded.max_users,
                max_clients = excluded.max_clients,
                max_storage_gb = excluded.max_storage_gb,
                updated_at = excluded.updated_at
            "#,
            params![
                plan.plan_id,
                plan.name,
                plan.limits.max_users,
                plan.limits.max_clients,
                plan.limits.max_storage_gb,
                now,
                now
            ],
        )?;

        Ok(())
    }

    pub fn list_plans(&self) -> Result<Vec<Plan>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT plan_id, name, max_users, max_clients, max_storage_gb
            FROM plans
            ORDER BY plan_id
            "#,
        )?;

        let rows = stmt.query_map([], plan_from_row)?;
        let mut plans = Vec::new();
        for row in rows {
            plans.push(row?);
        }
        Ok(plans)
    }

    pub fn delete_plan(&self, plan_id: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM plans WHERE plan_id = ?1", params![plan_id])?;
        if deleted == 0 {
            return Err(StorageError::PlanNotFound(plan_id.to_string()));
        }
        Ok(())
    }

    pub fn create_tenant(&self, tenant: &Tenant) -> Result<(), StorageError> {
        if tenant.storage_used_mb < 0.0 || !tenant.storage_used_mb.is_finite() {
            return Err(StorageError::InvalidValue(
                "storage_used_mb must be a non-negative number".into(),
            ));
        }

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO tenants (tenant_id, name, plan_id, status, storage_used_mb, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                tenant.tenant_id,
                tenant.name,
                tenant.plan_id,
                tenant.status.as_str(),
                tenant.storage_used_mb,
                tenant.created_at,
                tenant.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn list_tenants(
        &self,
        status_filter: Option<TenantStatus>,
    ) -> Result<Vec<Tenant>, StorageError> {
        let conn = self.lock()?;

        let mut sql = String::from(
            r#"
            SELECT tenant_id, name, plan_id, status, storage_used_mb, created_at, updated_at
            FROM tenants
            "#,
        );
        if status_filter.is_some() {
            sql.push_str("WHERE status = ?1");
        }
        sql.push_str(" ORDER BY created_at DESC");
        let mut stmt = conn.prepare(&sql)?;

        let rows = match status_filter {
            Some(status) => stmt.query_map(params![status.as_str()], tenant_from_row)?,
            None => stmt.query_map([], tenant_from_row)?,
        };

        let mut tenants = Vec::new();
        for row in rows {
            tenants.push(row?);
        }
        Ok(tenants)
    }

    pub fn update_tenant_status(
        &self,
        tenant_id: &str,
        status: TenantStatus,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            r#"
            UPDATE tenants
            SET status = ?2,
                updated_at = ?3
            WHERE tenant_id = ?1
            "#,
            params![tenant_id, status.as_str(), Utc::now().to_rfc3339()],
        )?;

        if updated == 0 {
            return Err(StorageError::TenantNotFound(tenant_id.to_string()));
        }
        Ok(())
    }

    pub fn update_tenant_plan(&self, tenant_id: &str, plan_id: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let plan_exists = conn
            .query_row(
                "SELECT 1 FROM plans WHERE plan_id = ?1",
                params![plan_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !plan_exists {
            return Err(StorageError::PlanNotFound(plan_id.to_string()));
        }

        let updated = conn.execute(
            r#"
            UPDATE tenants
            SET plan_id = ?2,
                updated_at = ?3
            WHERE tenant_id = ?1
            "#,
            params![tenant_id, plan_id, Utc::now().to_rfc3339()],
        )?;

        if updated == 0 {
            return Err(StorageError::TenantNotFound(tenant_id.to_string()));
        }
        Ok(())
    }

    pub fn insert_staff_user(&self, user: &StaffUserRecord) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO staff_users (user_id, tenant_id, name, email, role, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                user.user_id,
                user.tenant_id,
                user.name,
                user.email,
                user.role,
                user.created_at
            ],
        )?;
        Ok(())
    }

    pub fn insert_client(&self, client: &ClientRecord) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO clients (client_id, tenant_id, client_number, name, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                client.client_id,
                client.tenant_id,
                client.client_number,
                client.name,
                client.created_at
            ],
        )?;
        Ok(())
    }

    pub fn insert_attachment(&self, attachment: &AttachmentRecord) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO attachments (attachment_id, tenant_id, file_name, size_mb, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                attachment.attachment_id,
                attachment.tenant_id,
                attachment.file_name,
                attachment.size_mb,
                attachment.created_at
            ],
        )?;
        Ok(())
    }

    pub fn set_id_pattern(
        &self,
        tenant_id: &str,
        kind: &str,
        pattern: &str,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO id_patterns (tenant_id, kind, pattern, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(tenant_id, kind) DO UPDATE SET
                pattern = excluded.pattern,
                updated_at = excluded.updated_at
            "#,
            params![tenant_id, kind, pattern, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_id_pattern(&self, tenant_id: &str, kind: &str) -> Result<Option<String>, StorageError> {
        let conn = self.lock()?;
        let pattern = conn
            .query_row(
                "SELECT pattern FROM id_patterns WHERE tenant_id = ?1 AND kind = ?2",
                params![tenant_id, kind],
                |row| row.get(0),
            )
            .optional()?;
        Ok(pattern)
    }

    /// Atomically advances and returns the counter for (tenant, kind, year).
    /// The first call for a year returns 1.
    pub fn next_sequence(&self, tenant_id: &str, kind: &str, year: i32) -> Result<u64, StorageError> {
        let conn = self.lock()?;
        let value: i64 = conn.query_row(
            r#"
            INSERT INTO sequence_counters (tenant_id, kind, year, value)
            VALUES (?1, ?2, ?3, 1)
            ON CONFLICT(tenant_id, kind, year) DO UPDATE SET
                value = value + 1
            RETURNING value
            "#,
            params![tenant_id, kind, year],
            |row| row.get(0),
        )?;
        Ok(value as u64)
    }

    fn count_for_tenant(&self, sql: &str, tenant_id: &str) -> Result<u64, StorageError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(sql, params![tenant_id], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl TenantStore for ClinicDatabase {
    fn find_tenant_by_id(&self, tenant_id: &str) -> Result<Option<Tenant>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT tenant_id, name, plan_id, status, storage_used_mb, created_at, updated_at
            FROM tenants
            WHERE tenant_id = ?1
            "#,
        )?;

        let tenant = stmt
            .query_row(params![tenant_id], tenant_from_row)
            .optional()?;
        Ok(tenant)
    }

    fn increment_storage_used(
        &self,
        tenant_id: &str,
        amount_mb: f64,
    ) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            r#"
            UPDATE tenants
            SET storage_used_mb = storage_used_mb + ?2,
                updated_at = ?3
            WHERE tenant_id = ?1
            "#,
            params![tenant_id, amount_mb, Utc::now().to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    fn count_staff_users(&self, tenant_id: &str) -> Result<u64, StorageError> {
        self.count_for_tenant(
            "SELECT COUNT(*) FROM staff_users WHERE tenant_id = ?1",
            tenant_id,
        )
    }

    fn count_clients(&self, tenant_id: &str) -> Result<u64, StorageError> {
        self.count_for_tenant("SELECT COUNT(*) FROM clients WHERE tenant_id = ?1", tenant_id)
    }
}

impl PlanStore for ClinicDatabase {
    fn find_plan_by_id(&self, plan_id: &str) -> Result<Option<Plan>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT plan_id, name, max_users, max_clients, max_storage_gb
            FROM plans
            WHERE plan_id = ?1
            "#,
        )?;

        let plan = stmt.query_row(params![plan_id], plan_from_row).optional()?;
        Ok(plan)
    }
}

fn tenant_from_row(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    let status: String = row.get(3)?;
    let status = status
        .parse::<TenantStatus>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, err.into()))?;

    Ok(Tenant {
        tenant_id: row.get(0)?,
        name: row.get(1)?,
        plan_id: row.get(2)?,
        status,
        storage_used_mb: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<Plan> {
    Ok(Plan {
        plan_id: row.get(0)?,
        name: row.get(1)?,
        limits: PlanLimits {
            max_users: row.get(2)?,
            max_clients: row.get(3)?,
            max_storage_gb: row.get(4)?,
        },
    })
}

fn validate_limits(limits: &PlanLimits) -> Result<(), StorageError> {
    if limits.max_users < UNLIMITED {
        return Err(StorageError::InvalidValue(
            "max_users must be -1 or greater".into(),
        ));
    }
    if limits.max_clients < UNLIMITED {
        return Err(StorageError::InvalidValue(
            "max_clients must be -1 or greater".into(),
        ));
    }
    if !limits.max_storage_gb.is_finite() {
        return Err(StorageError::InvalidValue(
            "max_storage_gb must be a finite number".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_tenant(tenant_id: &str, plan_id: &str) -> Tenant {
        let now = Utc::now().to_rfc3339();
        Tenant {
            tenant_id: tenant_id.into(),
            name: format!("{tenant_id} clinic"),
            plan_id: plan_id.into(),
            status: TenantStatus::Active,
            storage_used_mb: 0.0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn tenant_round_trip_and_storage_increment() {
        let dir = tempdir().unwrap();
        let db = ClinicDatabase::new(dir.path().to_path_buf()).unwrap();
        db.create_tenant(&sample_tenant("clinic-a", "basic")).unwrap();

        assert!(db.increment_storage_used("clinic-a", 1.5).unwrap());
        assert!(db.increment_storage_used("clinic-a", 2.0).unwrap());
        assert!(!db.increment_storage_used("clinic-b", 2.0).unwrap());

        let tenant = db.find_tenant_by_id("clinic-a").unwrap().unwrap();
        assert_eq!(tenant.storage_used_mb, 3.5);
        assert_eq!(tenant.status, TenantStatus::Active);
        assert!(db.find_tenant_by_id("clinic-b").unwrap().is_none());
    }

    #[test]
    fn sequence_counters_are_scoped_by_tenant_kind_and_year() {
        let dir = tempdir().unwrap();
        let db = ClinicDatabase::new(dir.path().to_path_buf()).unwrap();
        db.create_tenant(&sample_tenant("clinic-a", "basic")).unwrap();
        db.create_tenant(&sample_tenant("clinic-b", "basic")).unwrap();

        assert_eq!(db.next_sequence("clinic-a", "invoice", 2025).unwrap(), 1);
        assert_eq!(db.next_sequence("clinic-a", "invoice", 2025).unwrap(), 2);
        assert_eq!(db.next_sequence("clinic-a", "receipt", 2025).unwrap(), 1);
        assert_eq!(db.next_sequence("clinic-a", "invoice", 2026).unwrap(), 1);
        assert_eq!(db.next_sequence("clinic-b", "invoice", 2025).unwrap(), 1);
    }

    #[test]
    fn plan_limits_are_validated() {
        let dir = tempdir().unwrap();
        let db = ClinicDatabase::new(dir.path().to_path_buf()).unwrap();
        let plan = Plan {
            plan_id: "broken".into(),
            name: "Broken".into(),
            limits: PlanLimits {
                max_users: -2,
                max_clients: 1,
                max_storage_gb: 1.0,
            },
        };
        assert!(matches!(
            db.upsert_plan(&plan),
            Err(StorageError::InvalidValue(_))
        ));
    }

    #[test]
    fn status_filter_limits_listing() {
        let dir = tempdir().unwrap();
        let db = ClinicDatabase::new(dir.path().to_path_buf()).unwrap();
        db.create_tenant(&sample_tenant("clinic-a", "basic")).unwrap();
        db.create_tenant(&sample_tenant("clinic-b", "basic")).unwrap();
        db.update_tenant_status("clinic-b", TenantStatus::Suspended)
            .unwrap();

        let suspended = db.list_tenants(Some(TenantStatus::Suspended)).unwrap();
        assert_eq!(suspended.len(), 1);
        assert_eq!(suspended[0].tenant_id, "clinic-b");
        assert_eq!(db.list_tenants(None).unwrap().len(), 2);
    }

    #[test]
    fn duplicate_client_number_is_a_unique_violation() {
        let dir = tempdir().unwrap();
        let db = ClinicDatabase::new(dir.path().to_path_buf()).unwrap();
        db.create_tenant(&sample_tenant("clinic-a", "basic")).unwrap();

        let client = |client_id: &str, tenant_id: &str| ClientRecord {
            client_id: client_id.into(),
            tenant_id: tenant_id.into(),
            client_number: "C-001".into(),
            name: "Owner".into(),
            created_at: Utc::now().to_rfc3339(),
        };
        db.insert_client(&client("c1", "clinic-a")).unwrap();

        let err = db.insert_client(&client("c2", "clinic-a")).unwrap_err();
        assert!(err.is_unique_violation());

        let err = db.insert_client(&client("c3", "clinic-x")).unwrap_err();
        assert!(!err.is_unique_violation());
    }
}
