//! Metadata store abstraction and implementation for depot.
//!
//! This crate holds the durable state of the repository:
//! - Artifact records and their extension attributes
//! - The name search index
//! - The per-owner quota ledger
//! - Sharing scopes
//! - API tokens

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};

use depot_core::config::{MetadataConfig, QuotaConfig};
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(
    config: &MetadataConfig,
    quota: &QuotaConfig,
) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            tracing::info!(path = %path.display(), "Opening SQLite metadata store");
            let store = SqliteStore::new(path, *query_timeout_secs)
                .await?
                .with_default_quota(quota.default_limit_bytes);
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::config::{MetadataConfig, QuotaConfig};

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("metadata.db");
        let config = MetadataConfig::Sqlite {
            path: db_path.clone(),
            query_timeout_secs: None,
        };
        let quota = QuotaConfig {
            default_limit_bytes: 1234,
        };

        let store = from_config(&config, &quota).await.unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists());
        assert_eq!(store.quota_limit("nobody").await.unwrap(), 1234);
    }
}
