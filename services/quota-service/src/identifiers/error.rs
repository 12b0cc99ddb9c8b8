use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum IdentifierError {
    #[error("tenant {0} not found")]
    TenantNotFound(String),
    #[error("unknown identifier kind '{0}'")]
    UnknownKind(String),
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("storage error: {0}")]
    StorageError(#[from] StorageError),
}
