pub mod api;
pub mod config;
pub mod identifiers;
pub mod quota;
pub mod storage;

pub use api::{create_router, ApiState, ErrorResponse};
pub use config::QuotaServiceConfig;
pub use identifiers::{GeneratedId, IdentifierError, IdentifierKind, IdentifierService};
pub use quota::{
    Plan, PlanLimits, PlanStore, QuotaEnforcer, QuotaError, ResourceKind, Tenant, TenantStatus,
    TenantStore, TenantUsage, FALLBACK_PLAN_LIMITS, UNLIMITED,
};
pub use storage::{ClinicDatabase, StorageError};
