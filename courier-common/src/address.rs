use std::{
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing an envelope address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Address is empty")]
    Empty,

    #[error("Address is missing an '@': {0}")]
    MissingAt(String),

    #[error("Address has an empty local part: {0}")]
    EmptyLocalPart(String),

    #[error("Address has an empty domain: {0}")]
    EmptyDomain(String),
}

/// An envelope address as handed over by the SMTP front end.
///
/// The domain is kept separately so queue records can be routed and
/// reported on per domain without re-parsing the mailbox.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    local_part: String,
    domain: String,
}

impl Address {
    #[must_use]
    pub fn new(local_part: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local_part: local_part.into(),
            domain: domain.into(),
        }
    }

    /// The full mailbox, `local@domain`
    #[must_use]
    pub fn email(&self) -> String {
        self.to_string()
    }

    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('<').trim_end_matches('>');
        if s.is_empty() {
            return Err(AddressError::Empty);
        }

        // The domain never contains '@', quoted local parts may
        let (local, domain) = s
            .rsplit_once('@')
            .ok_or_else(|| AddressError::MissingAt(s.to_string()))?;

        if local.is_empty() {
            return Err(AddressError::EmptyLocalPart(s.to_string()));
        }
        if domain.is_empty() {
            return Err(AddressError::EmptyDomain(s.to_string()));
        }

        Ok(Self::new(local, domain))
    }
}
