//! Owner identities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum identity length in bytes.
pub const MAX_IDENTITY_LEN: usize = 256;

/// An authenticated user identity (an owner fingerprint).
///
/// Identities are opaque strings produced by the token capability. They own
/// artifacts, carry quota, and appear in sharing scopes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Parse and validate an identity.
    pub fn parse(s: impl Into<String>) -> crate::Result<Self> {
        let s = s.into();
        if s.is_empty() {
            return Err(crate::Error::InvalidIdentity("identity is empty".to_string()));
        }
        if s.len() > MAX_IDENTITY_LEN {
            return Err(crate::Error::InvalidIdentity(format!(
                "identity exceeds {MAX_IDENTITY_LEN} bytes"
            )));
        }
        if s.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(crate::Error::InvalidIdentity(format!(
                "identity contains whitespace or control characters: {s:?}"
            )));
        }
        Ok(Self(s))
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

impl PartialEq<str> for Identity {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Identity {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
