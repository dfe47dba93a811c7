//! Quota ledger repository.

use crate::error::MetadataResult;
use crate::models::{QuotaRow, UsageCorrection};
use async_trait::async_trait;

/// Repository for per-owner (limit, used) counters.
///
/// Owners the ledger has never seen read as the configured default limit with
/// zero usage; their row is created on the first write.
#[async_trait]
pub trait QuotaRepo: Send + Sync {
    /// Current ledger entry for an owner.
    async fn get_quota(&self, owner: &str) -> MetadataResult<QuotaRow>;

    /// Configured limit in bytes.
    async fn quota_limit(&self, owner: &str) -> MetadataResult<u64> {
        Ok(self.get_quota(owner).await?.limit())
    }

    /// Bytes in use.
    async fn quota_used(&self, owner: &str) -> MetadataResult<u64> {
        Ok(self.get_quota(owner).await?.used())
    }

    /// Bytes remaining, clamped at zero.
    async fn quota_left(&self, owner: &str) -> MetadataResult<u64> {
        Ok(self.get_quota(owner).await?.left())
    }

    /// Set an owner's limit. Negative limits are rejected.
    async fn set_quota(&self, owner: &str, limit_bytes: i64) -> MetadataResult<QuotaRow>;

    /// Apply a signed delta to usage. The result is clamped at zero.
    async fn adjust_usage(&self, owner: &str, delta: i64) -> MetadataResult<QuotaRow>;

    /// Charge `bytes` if they fit in the remaining quota.
    ///
    /// Check and charge happen in one write; on `QuotaExceeded` nothing
    /// changes.
    async fn reserve_quota(&self, owner: &str, bytes: u64) -> MetadataResult<QuotaRow>;

    /// Return previously reserved bytes.
    async fn release_quota(&self, owner: &str, bytes: u64) -> MetadataResult<QuotaRow>;

    /// Reset every owner's usage to the total size of the artifacts they own.
    /// Returns the owners whose recorded usage was wrong.
    async fn recompute_usage(&self) -> MetadataResult<Vec<UsageCorrection>>;
}
