use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ceiling value meaning "no limit" for user and client counts.
pub const UNLIMITED: i64 = -1;

/// Limits applied when a tenant's plan record cannot be found.
pub const FALLBACK_PLAN_LIMITS: PlanLimits = PlanLimits {
    max_users: 1,
    max_clients: 10,
    max_storage_gb: 0.5,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Restricted,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Restricted => "restricted",
            TenantStatus::Suspended => "suspended",
        }
    }

    /// Restricted and suspended tenants are refused every quota-gated operation.
    pub fn blocks_gated_operations(&self) -> bool {
        matches!(self, TenantStatus::Restricted | TenantStatus::Suspended)
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(TenantStatus::Active),
            "restricted" => Ok(TenantStatus::Restricted),
            "suspended" => Ok(TenantStatus::Suspended),
            _ => anyhow::bail!("unknown tenant status: {}", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: String,
    pub name: String,
    pub plan_id: String,
    pub status: TenantStatus,
    pub storage_used_mb: f64,
    pub created_at: String,
    pub updated_at: String,
}

/// Resource ceilings of a subscription tier. `max_users` and `max_clients`
/// accept [`UNLIMITED`]; `max_storage_gb` has no unlimited value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_users: i64,
    pub max_clients: i64,
    pub max_storage_gb: f64,
}

impl PlanLimits {
    pub fn storage_ceiling_mb(&self) -> f64 {
        self.max_storage_gb * 1024.0
    }

    pub fn users_unlimited(&self) -> bool {
        self.max_users == UNLIMITED
    }

    pub fn clients_unlimited(&self) -> bool {
        self.max_clients == UNLIMITED
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub name: String,
    #[serde(flatten)]
    pub limits: PlanLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Storage,
    Users,
    Clients,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Storage => "storage",
            ResourceKind::Users => "users",
            ResourceKind::Clients => "clients",
        }
    }

    /// Message shown to clinic staff when the limit for this resource is hit.
    pub fn limit_message(&self) -> &'static str {
        match self {
            ResourceKind::Storage => "Storage quota exceeded",
            ResourceKind::Users => "User limit reached",
            ResourceKind::Clients => "Client limit reached",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a tenant's consumption against its effective limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantUsage {
    pub tenant_id: String,
    pub plan_id: String,
    pub status: TenantStatus,
    pub limits: PlanLimits,
    pub using_fallback_limits: bool,
    pub users: u64,
    pub clients: u64,
    pub storage_used_mb: f64,
    pub storage_limit_mb: f64,
}

impl TenantUsage {
    pub fn storage_percentage(&self) -> f64 {
        if self.storage_limit_mb <= 0.0 {
            return 100.0;
        }
        (self.storage_used_mb / self.storage_limit_mb) * 100.0
    }

    pub fn remaining_users(&self) -> Option<u64> {
        if self.limits.users_unlimited() {
            return None;
        }
        Some((self.limits.max_users.max(0) as u64).saturating_sub(self.users))
    }

    pub fn remaining_clients(&self) -> Option<u64> {
        if self.limits.clients_unlimited() {
            return None;
        }
        Some((self.limits.max_clients.max(0) as u64).saturating_sub(self.clients))
    }
}
