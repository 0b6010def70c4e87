use std::fmt;

use serde::{Deserialize, Serialize};

use crate::limits::MAX_TENANT_ID_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTenantId {
    #[error("empty tenant id")]
    Empty,
    #[error("tenant id too long ({0} chars)")]
    TooLong(usize),
    #[error("tenant id contains invalid character {0:?}")]
    InvalidChar(char),
}

/// An isolated customer account. Every stored appointment and every
/// operation is scoped to exactly one tenant.
///
/// Only `[A-Za-z0-9_-]` is accepted. Ids are rejected rather than sanitized
/// so two different ids can never map onto the same WAL file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidTenantId> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidTenantId::Empty);
        }
        if id.len() > MAX_TENANT_ID_LEN {
            return Err(InvalidTenantId::TooLong(id.len()));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(InvalidTenantId::InvalidChar(c));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this tenant's write-ahead log inside the data directory.
    pub fn wal_file_name(&self) -> String {
        format!("{}.wal", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = InvalidTenantId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}
