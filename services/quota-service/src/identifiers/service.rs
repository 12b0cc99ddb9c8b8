use std::sync::Arc;

use chrono::{Datelike, Utc};
use clinic_sequence_id::generate_next_id_in_year;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::quota::TenantStore;
use crate::storage::{ClinicDatabase, StorageError};

use super::error::IdentifierError;
use super::IdentifierKind;

const MAX_PATTERN_LEN: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedId {
    pub tenant_id: String,
    pub kind: IdentifierKind,
    pub year: i32,
    pub sequence: u64,
    pub identifier: String,
    pub pattern: Option<String>,
}

/// Issues display identifiers from per-tenant, per-kind, per-year counters.
///
/// Counters only move forward: a sequence drawn for a creation that later
/// fails leaves a gap instead of being reissued.
#[derive(Clone)]
pub struct IdentifierService {
    database: Arc<ClinicDatabase>,
}

impl IdentifierService {
    pub fn new(database: Arc<ClinicDatabase>) -> Self {
        Self { database }
    }

    pub fn next_identifier(
        &self,
        tenant_id: &str,
        kind: IdentifierKind,
    ) -> Result<GeneratedId, IdentifierError> {
        self.ensure_tenant(tenant_id)?;
        Ok(self.allocate(tenant_id, kind)?)
    }

    /// Draws the next sequence for the current year without checking that the
    /// tenant exists. Used inside flows that already hold the tenant record.
    pub fn allocate(
        &self,
        tenant_id: &str,
        kind: IdentifierKind,
    ) -> Result<GeneratedId, StorageError> {
        self.allocate_in_year(tenant_id, kind, Utc::now().year())
    }

    pub fn allocate_in_year(
        &self,
        tenant_id: &str,
        kind: IdentifierKind,
        year: i32,
    ) -> Result<GeneratedId, StorageError> {
        let pattern = self.database.get_id_pattern(tenant_id, kind.as_str())?;
        let sequence = self.database.next_sequence(tenant_id, kind.as_str(), year)?;
        let identifier = generate_next_id_in_year(pattern.as_deref(), sequence, year);

        debug!(tenant_id, kind = %kind, sequence, identifier = %identifier, "issued identifier");

        Ok(GeneratedId {
            tenant_id: tenant_id.to_string(),
            kind,
            year,
            sequence,
            identifier,
            pattern,
        })
    }

    pub fn set_pattern(
        &self,
        tenant_id: &str,
        kind: IdentifierKind,
        pattern: &str,
    ) -> Result<(), IdentifierError> {
        validate_pattern(pattern)?;
        self.ensure_tenant(tenant_id)?;
        self.database
            .set_id_pattern(tenant_id, kind.as_str(), pattern)?;
        Ok(())
    }

    pub fn pattern(
        &self,
        tenant_id: &str,
        kind: IdentifierKind,
    ) -> Result<Option<String>, IdentifierError> {
        Ok(self.database.get_id_pattern(tenant_id, kind.as_str())?)
    }

    /// Formats without touching any counter.
    pub fn preview(pattern: Option<&str>, sequence: u64) -> String {
        clinic_sequence_id::generate_next_id(pattern, sequence)
    }

    fn ensure_tenant(&self, tenant_id: &str) -> Result<(), IdentifierError> {
        match self.database.find_tenant_by_id(tenant_id)? {
            Some(_) => Ok(()),
            None => Err(IdentifierError::TenantNotFound(tenant_id.to_string())),
        }
    }
}

fn validate_pattern(pattern: &str) -> Result<(), IdentifierError> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(IdentifierError::InvalidPattern(format!(
            "pattern longer than {MAX_PATTERN_LEN} bytes"
        )));
    }
    if pattern.chars().any(|ch| ch.is_control()) {
        return Err(IdentifierError::InvalidPattern(
            "pattern contains control characters".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_validation_rejects_control_characters() {
        assert!(validate_pattern("INV-0000").is_ok());
        assert!(validate_pattern("").is_ok());
        assert!(matches!(
            validate_pattern("INV\n000"),
            Err(IdentifierError::InvalidPattern(_))
        ));
        assert!(validate_pattern(&"0".repeat(MAX_PATTERN_LEN + 1)).is_err());
    }

    #[test]
    fn kinds_parse_case_insensitively() {
        assert_eq!("Invoice".parse::<IdentifierKind>().unwrap(), IdentifierKind::Invoice);
        assert_eq!("CLIENT".parse::<IdentifierKind>().unwrap(), IdentifierKind::Client);
        assert!(matches!(
            "patient".parse::<IdentifierKind>(),
            Err(IdentifierError::UnknownKind(_))
        ));
    }
}
