use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::storage::StorageError;

use super::error::QuotaError;
use super::model::{PlanLimits, ResourceKind, Tenant, TenantUsage, FALLBACK_PLAN_LIMITS};
use super::store::{PlanStore, TenantStore};

/// Plan-tier limit checks for resource-creating operations.
///
/// `check_limits` and `track_storage` are independent: two requests can both
/// pass a check before either tracks its usage, so used on their own they
/// form a best-effort limit. `with_quota` serialises check, create and track
/// per tenant for callers that need the ceiling to hold.
#[derive(Clone)]
pub struct QuotaEnforcer {
    tenants: Arc<dyn TenantStore>,
    plans: Arc<dyn PlanStore>,
    tenant_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl QuotaEnforcer {
    pub fn new(tenants: Arc<dyn TenantStore>, plans: Arc<dyn PlanStore>) -> Self {
        Self {
            tenants,
            plans,
            tenant_locks: Arc::new(DashMap::new()),
        }
    }

    /// Validates that `tenant_id` may consume `increment` more of `resource`.
    ///
    /// For storage the increment is in megabytes, for users and clients it is
    /// a count. Returns the tenant unchanged; nothing is persisted.
    pub fn check_limits(
        &self,
        tenant_id: &str,
        resource: ResourceKind,
        increment: f64,
    ) -> Result<Tenant, QuotaError> {
        let tenant = self
            .tenants
            .find_tenant_by_id(tenant_id)?
            .ok_or_else(|| QuotaError::TenantNotFound(tenant_id.to_string()))?;

        if tenant.status.blocks_gated_operations() {
            return Err(QuotaError::AccountRestricted(tenant_id.to_string()));
        }

        validate_increment(increment)?;
        let (limits, _) = self.effective_limits(&tenant)?;

        match resource {
            // -1 is a literal ceiling here, not "unlimited".
            ResourceKind::Storage => {
                let ceiling = limits.storage_ceiling_mb();
                if tenant.storage_used_mb + increment > ceiling {
                    return Err(exceeded(
                        tenant_id,
                        resource,
                        ceiling,
                        tenant.storage_used_mb,
                        increment,
                    ));
                }
            }
            ResourceKind::Users => {
                if !limits.users_unlimited() {
                    let current = self.tenants.count_staff_users(tenant_id)? as f64;
                    let ceiling = limits.max_users as f64;
                    if current + increment > ceiling {
                        return Err(exceeded(tenant_id, resource, ceiling, current, increment));
                    }
                }
            }
            ResourceKind::Clients => {
                if !limits.clients_unlimited() {
                    let current = self.tenants.count_clients(tenant_id)? as f64;
                    let ceiling = limits.max_clients as f64;
                    if current + increment > ceiling {
                        return Err(exceeded(tenant_id, resource, ceiling, current, increment));
                    }
                }
            }
        }

        debug!(tenant_id, resource = %resource, increment, "quota check passed");
        Ok(tenant)
    }

    /// Adds `mb_used` to the tenant's persisted storage counter.
    pub fn track_storage(&self, tenant_id: &str, mb_used: f64) -> Result<(), QuotaError> {
        validate_increment(mb_used)?;

        if !self.tenants.increment_storage_used(tenant_id, mb_used)? {
            return Err(QuotaError::TenantNotFound(tenant_id.to_string()));
        }

        debug!(tenant_id, mb_used, "tracked storage usage");
        Ok(())
    }

    /// Runs check, `create` and storage tracking while holding the tenant's lock.
    ///
    /// `storage_mb` is tracked only after `create` succeeds; a failed creation
    /// leaves the counter untouched.
    pub fn with_quota<T, F>(
        &self,
        tenant_id: &str,
        resource: ResourceKind,
        increment: f64,
        storage_mb: f64,
        create: F,
    ) -> Result<T, QuotaError>
    where
        F: FnOnce(&Tenant) -> Result<T, StorageError>,
    {
        if self.tenants.find_tenant_by_id(tenant_id)?.is_none() {
            return Err(QuotaError::TenantNotFound(tenant_id.to_string()));
        }

        let lock = self.tenant_lock(tenant_id);
        let result = {
            // The guarded value is (), so a poisoned lock carries no broken state.
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

            self.check_limits(tenant_id, resource, increment)
                .and_then(|tenant| create(&tenant).map_err(QuotaError::from))
                .and_then(|created| {
                    if storage_mb > 0.0 {
                        self.track_storage(tenant_id, storage_mb)?;
                    }
                    Ok(created)
                })
        };
        drop(lock);
        self.release_tenant_lock(tenant_id);
        result
    }

    #[cfg(test)]
    fn locked_tenant_count(&self) -> usize {
        self.tenant_locks.len()
    }

    pub fn usage(&self, tenant_id: &str) -> Result<TenantUsage, QuotaError> {
        let tenant = self
            .tenants
            .find_tenant_by_id(tenant_id)?
            .ok_or_else(|| QuotaError::TenantNotFound(tenant_id.to_string()))?;
        let (limits, using_fallback_limits) = self.effective_limits(&tenant)?;

        Ok(TenantUsage {
            users: self.tenants.count_staff_users(tenant_id)?,
            clients: self.tenants.count_clients(tenant_id)?,
            storage_used_mb: tenant.storage_used_mb,
            storage_limit_mb: limits.storage_ceiling_mb(),
            tenant_id: tenant.tenant_id,
            plan_id: tenant.plan_id,
            status: tenant.status,
            limits,
            using_fallback_limits,
        })
    }

    fn effective_limits(&self, tenant: &Tenant) -> Result<(PlanLimits, bool), StorageError> {
        match self.plans.find_plan_by_id(&tenant.plan_id)? {
            Some(plan) => Ok((plan.limits, false)),
            None => {
                warn!(
                    tenant_id = %tenant.tenant_id,
                    plan_id = %tenant.plan_id,
                    "plan missing, applying fallback limits"
                );
                Ok((FALLBACK_PLAN_LIMITS, true))
            }
        }
    }

    fn tenant_lock(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        self.tenant_locks
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Drops the tenant's lock entry once no other caller holds it.
    fn release_tenant_lock(&self, tenant_id: &str) {
        self.tenant_locks
            .remove_if(tenant_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn validate_increment(value: f64) -> Result<(), QuotaError> {
    if !value.is_finite() || value < 0.0 {
        return Err(QuotaError::InvalidIncrement(value));
    }
    Ok(())
}

fn exceeded(
    tenant_id: &str,
    resource: ResourceKind,
    limit: f64,
    current: f64,
    requested: f64,
) -> QuotaError {
    QuotaError::QuotaExceeded {
        tenant_id: tenant_id.to_string(),
        resource,
        limit,
        current,
        requested,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::quota::model::{Plan, TenantStatus, UNLIMITED};

    #[derive(Default)]
    struct MemoryStore {
        tenants: Mutex<HashMap<String, Tenant>>,
        plans: HashMap<String, Plan>,
        staff: HashMap<String, u64>,
        clients: HashMap<String, u64>,
    }

    impl TenantStore for MemoryStore {
        fn find_tenant_by_id(&self, tenant_id: &str) -> Result<Option<Tenant>, StorageError> {
            Ok(self.tenants.lock().unwrap().get(tenant_id).cloned())
        }

        fn increment_storage_used(
            &self,
            tenant_id: &str,
            amount_mb: f64,
        ) -> Result<bool, StorageError> {
            let mut tenants = self.tenants.lock().unwrap();
            match tenants.get_mut(tenant_id) {
                Some(tenant) => {
                    tenant.storage_used_mb += amount_mb;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        fn count_staff_users(&self, tenant_id: &str) -> Result<u64, StorageError> {
            Ok(self.staff.get(tenant_id).copied().unwrap_or(0))
        }

        fn count_clients(&self, tenant_id: &str) -> Result<u64, StorageError> {
            Ok(self.clients.get(tenant_id).copied().unwrap_or(0))
        }
    }

    impl PlanStore for MemoryStore {
        fn find_plan_by_id(&self, plan_id: &str) -> Result<Option<Plan>, StorageError> {
            Ok(self.plans.get(plan_id).cloned())
        }
    }

    fn tenant(status: TenantStatus, plan_id: &str, storage_used_mb: f64) -> Tenant {
        Tenant {
            tenant_id: "clinic-a".into(),
            name: "Clinic A".into(),
            plan_id: plan_id.into(),
            status,
            storage_used_mb,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    fn plan(max_users: i64, max_clients: i64, max_storage_gb: f64) -> Plan {
        Plan {
            plan_id: "pro".into(),
            name: "Pro".into(),
            limits: PlanLimits {
                max_users,
                max_clients,
                max_storage_gb,
            },
        }
    }

    fn enforcer(store: MemoryStore) -> (QuotaEnforcer, Arc<MemoryStore>) {
        let store = Arc::new(store);
        (QuotaEnforcer::new(store.clone(), store.clone()), store)
    }

    fn store_with(tenant: Tenant, plan: Option<Plan>, staff: u64, clients: u64) -> MemoryStore {
        let mut store = MemoryStore::default();
        let id = tenant.tenant_id.clone();
        store.tenants.lock().unwrap().insert(id.clone(), tenant);
        if let Some(plan) = plan {
            store.plans.insert(plan.plan_id.clone(), plan);
        }
        store.staff.insert(id.clone(), staff);
        store.clients.insert(id, clients);
        store
    }

    #[test]
    fn unknown_tenant_is_not_found() {
        let (enforcer, _) = enforcer(MemoryStore::default());
        let err = enforcer
            .check_limits("missing", ResourceKind::Users, 1.0)
            .unwrap_err();
        assert!(matches!(err, QuotaError::TenantNotFound(id) if id == "missing"));
    }

    #[test]
    fn blocked_tenants_are_restricted_for_every_resource() {
        for status in [TenantStatus::Restricted, TenantStatus::Suspended] {
            let store = store_with(tenant(status, "pro", 0.0), Some(plan(-1, -1, 100.0)), 0, 0);
            let (enforcer, _) = enforcer(store);
            for resource in [ResourceKind::Storage, ResourceKind::Users, ResourceKind::Clients] {
                for increment in [0.0, 1.0, 1e9] {
                    let err = enforcer
                        .check_limits("clinic-a", resource, increment)
                        .unwrap_err();
                    assert!(matches!(err, QuotaError::AccountRestricted(_)));
                }
            }
        }
    }

    #[test]
    fn storage_limit_is_inclusive() {
        let store = store_with(
            tenant(TenantStatus::Active, "pro", 1000.0),
            Some(plan(5, 5, 1.0)),
            0,
            0,
        );
        let (enforcer, _) = enforcer(store);

        assert!(enforcer
            .check_limits("clinic-a", ResourceKind::Storage, 24.0)
            .is_ok());
        let err = enforcer
            .check_limits("clinic-a", ResourceKind::Storage, 24.5)
            .unwrap_err();
        assert_eq!(err.resource(), Some(ResourceKind::Storage));
    }

    #[test]
    fn storage_minus_one_is_a_literal_ceiling() {
        let store = store_with(
            tenant(TenantStatus::Active, "pro", 0.0),
            Some(plan(UNLIMITED, UNLIMITED, -1.0)),
            0,
            0,
        );
        let (enforcer, _) = enforcer(store);

        let err = enforcer
            .check_limits("clinic-a", ResourceKind::Storage, 0.0)
            .unwrap_err();
        match err {
            QuotaError::QuotaExceeded { limit, .. } => assert_eq!(limit, -1024.0),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unlimited_users_ignore_current_count() {
        let store = store_with(
            tenant(TenantStatus::Active, "pro", 0.0),
            Some(plan(UNLIMITED, 2, 1.0)),
            10_000,
            0,
        );
        let (enforcer, _) = enforcer(store);
        assert!(enforcer
            .check_limits("clinic-a", ResourceKind::Users, 1.0)
            .is_ok());
    }

    #[test]
    fn user_and_client_limits_use_live_counts() {
        let store = store_with(
            tenant(TenantStatus::Active, "pro", 0.0),
            Some(plan(3, 20, 1.0)),
            3,
            19,
        );
        let (enforcer, _) = enforcer(store);

        let err = enforcer
            .check_limits("clinic-a", ResourceKind::Users, 1.0)
            .unwrap_err();
        assert_eq!(err.resource(), Some(ResourceKind::Users));

        assert!(enforcer
            .check_limits("clinic-a", ResourceKind::Clients, 1.0)
            .is_ok());
        let err = enforcer
            .check_limits("clinic-a", ResourceKind::Clients, 2.0)
            .unwrap_err();
        assert_eq!(err.resource(), Some(ResourceKind::Clients));
    }

    #[test]
    fn missing_plan_uses_fallback_limits() {
        let store = store_with(tenant(TenantStatus::Active, "gone", 500.0), None, 1, 9);
        let (enforcer, _) = enforcer(store);

        assert!(enforcer
            .check_limits("clinic-a", ResourceKind::Clients, 1.0)
            .is_ok());
        assert!(enforcer
            .check_limits("clinic-a", ResourceKind::Users, 1.0)
            .is_err());
        assert!(enforcer
            .check_limits("clinic-a", ResourceKind::Storage, 12.0)
            .is_ok());
        assert!(enforcer
            .check_limits("clinic-a", ResourceKind::Storage, 12.5)
            .is_err());

        let usage = enforcer.usage("clinic-a").unwrap();
        assert!(usage.using_fallback_limits);
        assert_eq!(usage.limits, FALLBACK_PLAN_LIMITS);
    }

    #[test]
    fn negative_increment_is_rejected() {
        let store = store_with(tenant(TenantStatus::Active, "pro", 0.0), Some(plan(1, 1, 1.0)), 0, 0);
        let (enforcer, _) = enforcer(store);
        assert!(matches!(
            enforcer.check_limits("clinic-a", ResourceKind::Storage, -1.0),
            Err(QuotaError::InvalidIncrement(_))
        ));
        assert!(matches!(
            enforcer.track_storage("clinic-a", f64::NAN),
            Err(QuotaError::InvalidIncrement(_))
        ));
    }

    #[test]
    fn check_does_not_modify_usage() {
        let store = store_with(tenant(TenantStatus::Active, "pro", 10.0), Some(plan(1, 1, 1.0)), 0, 0);
        let (enforcer, store) = enforcer(store);
        enforcer
            .check_limits("clinic-a", ResourceKind::Storage, 100.0)
            .unwrap();
        let stored = store.find_tenant_by_id("clinic-a").unwrap().unwrap();
        assert_eq!(stored.storage_used_mb, 10.0);
    }

    #[test]
    fn track_storage_increments_counter() {
        let store = store_with(tenant(TenantStatus::Active, "pro", 10.0), Some(plan(1, 1, 1.0)), 0, 0);
        let (enforcer, store) = enforcer(store);
        enforcer.track_storage("clinic-a", 2.5).unwrap();
        enforcer.track_storage("clinic-a", 2.5).unwrap();
        let stored = store.find_tenant_by_id("clinic-a").unwrap().unwrap();
        assert_eq!(stored.storage_used_mb, 15.0);

        assert!(matches!(
            enforcer.track_storage("missing", 1.0),
            Err(QuotaError::TenantNotFound(_))
        ));
    }

    #[test]
    fn with_quota_tracks_only_after_successful_create() {
        let store = store_with(tenant(TenantStatus::Active, "pro", 0.0), Some(plan(1, 1, 1.0)), 0, 0);
        let (enforcer, store) = enforcer(store);

        let failed: Result<(), QuotaError> =
            enforcer.with_quota("clinic-a", ResourceKind::Storage, 8.0, 8.0, |_| {
                Err(StorageError::InvalidValue("upload rejected".into()))
            });
        assert!(matches!(failed, Err(QuotaError::StorageError(_))));
        assert_eq!(
            store.find_tenant_by_id("clinic-a").unwrap().unwrap().storage_used_mb,
            0.0
        );

        let name = enforcer
            .with_quota("clinic-a", ResourceKind::Storage, 8.0, 8.0, |tenant| {
                Ok(tenant.name.clone())
            })
            .unwrap();
        assert_eq!(name, "Clinic A");
        assert_eq!(
            store.find_tenant_by_id("clinic-a").unwrap().unwrap().storage_used_mb,
            8.0
        );
    }

    #[test]
    fn with_quota_serialises_concurrent_storage_requests() {
        let store = store_with(tenant(TenantStatus::Active, "pro", 0.0), Some(plan(1, 1, 1.0)), 0, 0);
        let (enforcer, store) = enforcer(store);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let enforcer = enforcer.clone();
                std::thread::spawn(move || {
                    enforcer
                        .with_quota("clinic-a", ResourceKind::Storage, 100.0, 100.0, |_| Ok(()))
                        .is_ok()
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 10);
        assert_eq!(enforcer.locked_tenant_count(), 0);
        assert_eq!(
            store.find_tenant_by_id("clinic-a").unwrap().unwrap().storage_used_mb,
            1000.0
        );
    }

    #[test]
    fn with_quota_leaves_no_lock_entries_behind() {
        let store = store_with(tenant(TenantStatus::Active, "pro", 0.0), Some(plan(1, 1, 1.0)), 0, 0);
        let (enforcer, _) = enforcer(store);

        for n in 0..100 {
            let err = enforcer
                .with_quota(&format!("ghost-{n}"), ResourceKind::Users, 1.0, 0.0, |_| Ok(()))
                .unwrap_err();
            assert!(matches!(err, QuotaError::TenantNotFound(_)));
        }
        assert_eq!(enforcer.locked_tenant_count(), 0);

        enforcer
            .with_quota("clinic-a", ResourceKind::Storage, 1.0, 1.0, |_| Ok(()))
            .unwrap();
        assert_eq!(enforcer.locked_tenant_count(), 0);
    }
}
