mod error;
mod service;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use error::IdentifierError;
pub use service::{GeneratedId, IdentifierService};

/// Kinds of tenant-facing identifiers that draw from their own yearly sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Invoice,
    Receipt,
    Client,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Invoice => "invoice",
            IdentifierKind::Receipt => "receipt",
            IdentifierKind::Client => "client",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifierKind {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "invoice" => Ok(IdentifierKind::Invoice),
            "receipt" => Ok(IdentifierKind::Receipt),
            "client" => Ok(IdentifierKind::Client),
            _ => Err(IdentifierError::UnknownKind(s.to_string())),
        }
    }
}
