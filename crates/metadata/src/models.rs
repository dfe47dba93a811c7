//! Database models mapping to the metadata schema.

use crate::error::MetadataResult;
use depot_core::{Artifact, ArtifactHash, ArtifactKind, Identity};
use sqlx::FromRow;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Artifacts
// =============================================================================

/// Artifact record. The primary key is the hex content hash.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactRow {
    pub hash: String,
    pub name: String,
    pub owner: String,
    pub kind: String,
    pub size_bytes: i64,
    pub created_at: OffsetDateTime,
}

impl ArtifactRow {
    /// Build the row for a domain artifact.
    pub fn from_artifact(artifact: &Artifact) -> Self {
        Self {
            hash: artifact.hash.to_hex(),
            name: artifact.name.clone(),
            owner: artifact.owner.to_string(),
            kind: artifact.kind.as_str().to_string(),
            size_bytes: to_db_bytes(artifact.size),
            created_at: artifact.created_at,
        }
    }

    /// Combine with its extension attributes into a domain artifact.
    pub fn into_artifact(self, attributes: BTreeMap<String, String>) -> MetadataResult<Artifact> {
        Ok(Artifact {
            hash: ArtifactHash::from_hex(&self.hash)?,
            name: self.name,
            owner: Identity::parse(self.owner)?,
            kind: ArtifactKind::parse(&self.kind)?,
            size: from_db_bytes(self.size_bytes),
            created_at: self.created_at,
            attributes,
        })
    }
}

/// One extension attribute of an artifact.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactAttributeRow {
    pub hash: String,
    pub key: String,
    pub value: String,
}

// =============================================================================
// Search index
// =============================================================================

/// Search index entry: one (name, timestamp, hash) triple.
#[derive(Debug, Clone, FromRow)]
pub struct SearchEntryRow {
    pub entry_id: i64,
    pub name: String,
    pub created_at_ns: i64,
    pub hash: String,
}

// =============================================================================
// Quota ledger
// =============================================================================

/// Quota ledger entry for one owner.
#[derive(Debug, Clone, FromRow)]
pub struct QuotaRow {
    pub owner: String,
    pub limit_bytes: i64,
    pub used_bytes: i64,
    pub updated_at: OffsetDateTime,
}

impl QuotaRow {
    /// Limit in bytes.
    pub fn limit(&self) -> u64 {
        from_db_bytes(self.limit_bytes)
    }

    /// Usage in bytes.
    pub fn used(&self) -> u64 {
        from_db_bytes(self.used_bytes)
    }

    /// Remaining bytes, never negative.
    pub fn left(&self) -> u64 {
        self.limit().saturating_sub(self.used())
    }
}

/// Result of recomputing one owner's usage from committed artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageCorrection {
    pub owner: String,
    pub recorded: u64,
    pub actual: u64,
}

// =============================================================================
// Sharing scopes
// =============================================================================

/// A read grant on an artifact.
#[derive(Debug, Clone, FromRow)]
pub struct ScopeGrantRow {
    pub hash: String,
    pub grantee: String,
    pub granted_by: String,
    pub granted_at: OffsetDateTime,
}

// =============================================================================
// Tokens
// =============================================================================

/// API token record. Only the SHA-256 digest of the secret is stored.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_id: Uuid,
    pub identity: String,
    pub token_hash: String,
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
    pub description: Option<String>,
}

impl TokenRow {
    /// Whether the token can authenticate at `now`.
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// Outcome of committing an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// A record with the same hash already existed.
    pub deduplicated: bool,
    /// Owner of the replaced record when ownership moved to the uploader.
    pub previous_owner: Option<String>,
    /// Bytes finally charged to the uploader.
    pub charged: u64,
}

/// SQLite stores integers as i64; sizes beyond i64::MAX are clamped.
pub(crate) fn to_db_bytes(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

pub(crate) fn from_db_bytes(bytes: i64) -> u64 {
    u64::try_from(bytes).unwrap_or(0)
}

/// Nanosecond timestamp used to order search entries.
pub(crate) fn to_db_nanos(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos()).unwrap_or(i64::MAX)
}
