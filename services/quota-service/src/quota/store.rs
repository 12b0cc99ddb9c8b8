use crate::storage::StorageError;

use super::model::{Plan, Tenant};

/// Tenant records and the live counts of their related entities.
pub trait TenantStore: Send + Sync {
    fn find_tenant_by_id(&self, tenant_id: &str) -> Result<Option<Tenant>, StorageError>;

    /// Adds `amount_mb` to the tenant's storage counter. Returns `false` when
    /// no tenant row matched.
    fn increment_storage_used(&self, tenant_id: &str, amount_mb: f64)
        -> Result<bool, StorageError>;

    fn count_staff_users(&self, tenant_id: &str) -> Result<u64, StorageError>;

    fn count_clients(&self, tenant_id: &str) -> Result<u64, StorageError>;
}

pub trait PlanStore: Send + Sync {
    fn find_plan_by_id(&self, plan_id: &str) -> Result<Option<Plan>, StorageError>;
}
