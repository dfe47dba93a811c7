//! Application state shared across handlers.

use crate::auth::{MetadataTokenChecker, TokenChecker};
use crate::locks::HashLocks;
use depot_core::config::AppConfig;
use depot_metadata::MetadataStore;
use depot_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Token capability used to resolve callers.
    pub tokens: Arc<dyn TokenChecker>,
    /// Serializes promotion, commit and deletion per content hash.
    pub hash_locks: Arc<HashLocks>,
}

impl AppState {
    /// Create a new application state that checks tokens against the
    /// metadata store.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let tokens = Arc::new(MetadataTokenChecker::new(metadata.clone()));
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            tokens,
            hash_locks: Arc::new(HashLocks::new()),
        }
    }

    /// Replace the token capability.
    pub fn with_token_checker(mut self, tokens: Arc<dyn TokenChecker>) -> Self {
        self.tokens = tokens;
        self
    }
}
