//! Artifact records and kinds.

use crate::hash::ArtifactHash;
use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Maximum display name length in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum attribute key length in bytes.
pub const MAX_ATTRIBUTE_KEY_LEN: usize = 64;

/// Maximum attribute value length in bytes.
pub const MAX_ATTRIBUTE_VALUE_LEN: usize = 4096;

/// Attribute keys projected from the required record fields. They can never
/// be set through the extension map.
pub const RESERVED_ATTRIBUTE_KEYS: &[&str] = &["name", "date", "owner", "type", "size"];

/// Kind of artifact, fixed at upload time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Opaque file.
    Raw,
    /// Debian package.
    Apt,
    /// Container template.
    Template,
}

impl ArtifactKind {
    /// All kinds, in listing order.
    pub const ALL: [ArtifactKind; 3] = [Self::Raw, Self::Apt, Self::Template];

    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "raw" => Ok(Self::Raw),
            "apt" => Ok(Self::Apt),
            "template" => Ok(Self::Template),
            _ => Err(crate::Error::InvalidArtifactKind(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Apt => "apt",
            Self::Template => "template",
        }
    }

    /// Extension attributes this kind accepts from upload form fields.
    pub fn upload_attribute_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Raw => &["version"],
            Self::Apt => &["version", "architecture", "package", "description"],
            Self::Template => &["version", "architecture", "parent", "description"],
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

/// Validate an artifact display name.
pub fn validate_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidName("name is empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(crate::Error::InvalidName(format!(
            "name exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    if name.chars().any(|c| c.is_control() || c == '/' || c == '\\') {
        return Err(crate::Error::InvalidName(format!(
            "name contains path separators or control characters: {name:?}"
        )));
    }
    Ok(())
}

/// Validate one extension attribute.
pub fn validate_attribute(key: &str, value: &str) -> crate::Result<()> {
    if key.is_empty() || key.len() > MAX_ATTRIBUTE_KEY_LEN {
        return Err(crate::Error::InvalidAttribute(format!(
            "attribute key must be 1..={MAX_ATTRIBUTE_KEY_LEN} bytes"
        )));
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        return Err(crate::Error::InvalidAttribute(format!(
            "attribute key has invalid characters: {key:?}"
        )));
    }
    if RESERVED_ATTRIBUTE_KEYS.contains(&key) {
        return Err(crate::Error::InvalidAttribute(format!(
            "attribute key is reserved: {key}"
        )));
    }
    if value.len() > MAX_ATTRIBUTE_VALUE_LEN {
        return Err(crate::Error::InvalidAttribute(format!(
            "value for {key} exceeds {MAX_ATTRIBUTE_VALUE_LEN} bytes"
        )));
    }
    Ok(())
}

/// A committed artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Content hash (identity).
    pub hash: ArtifactHash,
    /// Display name.
    pub name: String,
    /// Owning identity.
    pub owner: Identity,
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// Size in bytes.
    pub size: u64,
    /// Creation timestamp of the latest metadata write.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Type-specific extension attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Artifact {
    /// Flattened attribute view: the required fields under their reserved
    /// keys plus every extension attribute.
    pub fn attribute_view(&self) -> BTreeMap<String, String> {
        let mut view = self.attributes.clone();
        view.insert("name".to_string(), self.name.clone());
        view.insert(
            "date".to_string(),
            self.created_at
                .format(&Rfc3339)
                .unwrap_or_else(|_| self.created_at.unix_timestamp().to_string()),
        );
        view.insert("owner".to_string(), self.owner.to_string());
        view.insert("type".to_string(), self.kind.to_string());
        view.insert("size".to_string(), self.size.to_string());
        view
    }

    /// Version attribute, if present.
    pub fn version(&self) -> Option<&str> {
        self.attributes.get("version").map(String::as_str)
    }
}
