//! Search index repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use depot_core::ArtifactHash;
use time::OffsetDateTime;

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub name: String,
    pub hash: String,
    pub created_at_ns: i64,
}

/// Repository for the name -> (timestamp, hash) index.
#[async_trait]
pub trait SearchRepo: Send + Sync {
    /// Append an entry.
    async fn index_artifact(
        &self,
        name: &str,
        created_at: OffsetDateTime,
        hash: &ArtifactHash,
    ) -> MetadataResult<()>;

    /// Every entry whose name starts with `query`, names in lexicographic
    /// order and entries within a name oldest first. An empty query matches
    /// everything.
    async fn search_by_prefix(&self, query: &str) -> MetadataResult<Vec<SearchHit>>;

    /// Hash of the newest entry for `name`. Fails with `NotFound` when the
    /// name has no entries.
    async fn last_hash(&self, name: &str) -> MetadataResult<ArtifactHash>;
}
