//! Ownership and sharing repository.
//!
//! Grant changes re-check ownership in their own transaction, so an
//! ownership transfer between a caller's check and the change is refused.

use crate::error::MetadataResult;
use async_trait::async_trait;
use depot_core::ArtifactHash;

/// Repository for artifact ownership checks and read grants.
#[async_trait]
pub trait ScopeRepo: Send + Sync {
    /// Whether `identity` owns the artifact.
    async fn check_owner(&self, identity: &str, hash: &ArtifactHash) -> MetadataResult<bool>;

    /// Grant `grantee` read access. Returns false if the grant already existed.
    /// Fails with `NotFound` for an unknown artifact and `NotOwner` unless
    /// `owner` owns it.
    async fn share_with(
        &self,
        hash: &ArtifactHash,
        owner: &str,
        grantee: &str,
    ) -> MetadataResult<bool>;

    /// Revoke a grant. Returns false if there was nothing to revoke. Fails
    /// like [`ScopeRepo::share_with`] for unknown or foreign artifacts.
    async fn unshare_with(
        &self,
        hash: &ArtifactHash,
        owner: &str,
        grantee: &str,
    ) -> MetadataResult<bool>;

    /// Grantees of an artifact, sorted.
    async fn get_scope(&self, hash: &ArtifactHash, owner: &str) -> MetadataResult<Vec<String>>;

    /// Whether a (possibly anonymous) caller may download the artifact.
    ///
    /// Artifacts without grants are public. Once shared, only the owner and
    /// grantees have access.
    async fn can_access(
        &self,
        identity: Option<&str>,
        hash: &ArtifactHash,
    ) -> MetadataResult<bool>;
}
