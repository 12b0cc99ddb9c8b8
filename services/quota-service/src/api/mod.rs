use std::sync::Arc;

pub mod handlers;
pub mod router;
pub mod types;

pub use router::create_router;
pub use types::*;

use crate::config::QuotaServiceConfig;
use crate::identifiers::IdentifierService;
use crate::quota::QuotaEnforcer;
use crate::storage::ClinicDatabase;

pub struct ApiState {
    pub database: Arc<ClinicDatabase>,
    pub enforcer: Arc<QuotaEnforcer>,
    pub identifiers: Arc<IdentifierService>,
    pub config: Arc<QuotaServiceConfig>,
}

impl ApiState {
    pub fn new(database: Arc<ClinicDatabase>, config: QuotaServiceConfig) -> Self {
        let enforcer = QuotaEnforcer::new(database.clone(), database.clone());
        let identifiers = IdentifierService::new(Arc::clone(&database));

        Self {
            database,
            enforcer: Arc::new(enforcer),
            identifiers: Arc::new(identifiers),
            config: Arc::new(config),
        }
    }
}
