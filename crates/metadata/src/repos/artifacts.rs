//! Artifact record repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use depot_core::{Artifact, ArtifactHash, ArtifactKind};
use std::collections::BTreeMap;

/// Repository for artifact records keyed by content hash.
#[async_trait]
pub trait ArtifactRepo: Send + Sync {
    /// Create or overwrite a record together with its search entry.
    ///
    /// An existing record with the same hash is replaced by the new metadata,
    /// extension attributes included. No quota is charged.
    async fn put_artifact(&self, artifact: &Artifact) -> MetadataResult<()>;

    /// Get a full record.
    async fn get_artifact(&self, hash: &ArtifactHash) -> MetadataResult<Option<Artifact>>;

    /// Get the display name of a record.
    async fn get_artifact_name(&self, hash: &ArtifactHash) -> MetadataResult<Option<String>>;

    /// Get the flattened attribute view of a record.
    async fn get_attributes(
        &self,
        hash: &ArtifactHash,
    ) -> MetadataResult<Option<BTreeMap<String, String>>>;

    /// Check whether a record exists.
    async fn artifact_exists(&self, hash: &ArtifactHash) -> MetadataResult<bool>;

    /// All records as hash -> name.
    async fn list_artifacts(&self) -> MetadataResult<BTreeMap<String, String>>;

    /// Records of one kind, ordered by name.
    async fn list_artifacts_by_kind(&self, kind: ArtifactKind) -> MetadataResult<Vec<Artifact>>;

    /// Add extension attributes. Keys already present keep their value.
    /// Returns the number of keys added.
    async fn append_attributes(
        &self,
        hash: &ArtifactHash,
        attributes: &BTreeMap<String, String>,
    ) -> MetadataResult<u64>;
}
