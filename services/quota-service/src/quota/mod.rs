pub mod enforcer;
pub mod error;
pub mod model;
pub mod store;

pub use enforcer::QuotaEnforcer;
pub use error::QuotaError;
pub use model::{
    Plan, PlanLimits, ResourceKind, Tenant, TenantStatus, TenantUsage, FALLBACK_PLAN_LIMITS,
    UNLIMITED,
};
pub use store::{PlanStore, TenantStore};
