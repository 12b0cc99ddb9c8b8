use thiserror::Error;

use crate::storage::StorageError;

use super::model::ResourceKind;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("tenant {0} not found")]
    TenantNotFound(String),
    #[error("tenant {0} is restricted")]
    AccountRestricted(String),
    #[error("quota exceeded for tenant {tenant_id} ({resource}): limit={limit}, current={current}, requested={requested}")]
    QuotaExceeded {
        tenant_id: String,
        resource: ResourceKind,
        limit: f64,
        current: f64,
        requested: f64,
    },
    #[error("invalid increment: {0}")]
    InvalidIncrement(f64),
    #[error("storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl QuotaError {
    pub fn resource(&self) -> Option<ResourceKind> {
        match self {
            QuotaError::QuotaExceeded { resource, .. } => Some(*resource),
            _ => None,
        }
    }
}
