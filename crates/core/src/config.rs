//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted request body in bytes (upload bodies included).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_body_bytes() -> u64 {
    8 * 1024 * 1024 * 1024 // 8 GiB
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Body limit clamped to the platform's address space.
    pub fn max_body_limit(&self) -> usize {
        usize::try_from(self.max_body_bytes).unwrap_or(usize::MAX)
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600) // 10 minutes (advisory only)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// Quota ledger configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Limit assigned to an owner the first time the ledger sees them.
    #[serde(default = "default_quota_limit_bytes")]
    pub default_limit_bytes: u64,
}

fn default_quota_limit_bytes() -> u64 {
    crate::DEFAULT_QUOTA_BYTES
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_limit_bytes: default_quota_limit_bytes(),
        }
    }
}

impl QuotaConfig {
    /// Validate quota configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_limit_bytes > i64::MAX as u64 {
            return Err(format!(
                "quota.default_limit_bytes {} exceeds maximum value {}",
                self.default_limit_bytes,
                i64::MAX
            ));
        }
        Ok(())
    }
}

/// Administrative identity configuration.
///
/// Quota administration is restricted to one distinguished identity. When
/// `token_hash` is set, a token for that identity is provisioned at startup;
/// if the hash changes between restarts the previous token is revoked.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Identity allowed to read and set quotas.
    #[serde(default = "default_admin_identity")]
    pub identity: String,
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    #[serde(default)]
    pub token_hash: Option<String>,
    /// Description for the admin token.
    #[serde(default)]
    pub token_description: Option<String>,
}

fn default_admin_identity() -> String {
    "Hub".to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            identity: default_admin_identity(),
            token_hash: None,
            token_description: None,
        }
    }
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is deterministic but not a real token.
    pub fn for_testing() -> Self {
        Self {
            identity: default_admin_identity(),
            // SHA256 of "test-admin-token"
            token_hash: Some(
                "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5".to_string(),
            ),
            token_description: Some("Test admin token".to_string()),
        }
    }

    /// Validate admin configuration.
    pub fn validate(&self) -> Result<(), String> {
        crate::Identity::parse(self.identity.as_str())
            .map_err(|e| format!("admin.identity: {e}"))?;
        if let Some(hash) = &self.token_hash {
            let hash = hash.strip_prefix("sha256:").unwrap_or(hash);
            if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!(
                    "admin.token_hash must be 64 hex characters (SHA256), got {} characters",
                    hash.len()
                ));
            }
        }
        Ok(())
    }
}

/// Startup reconciliation configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Run the reconciliation sweep before serving requests (default: true).
    #[serde(default = "default_reconcile_on_startup")]
    pub on_startup: bool,
    /// Staging objects younger than this are left alone.
    #[serde(default = "default_staging_grace_period_secs")]
    pub staging_grace_period_secs: u64,
    /// Report what would be removed without removing anything.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_reconcile_on_startup() -> bool {
    true
}

fn default_staging_grace_period_secs() -> u64 {
    3600 // 1 hour
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            on_startup: default_reconcile_on_startup(),
            staging_grace_period_secs: default_staging_grace_period_secs(),
            dry_run: false,
        }
    }
}

impl ReconcileConfig {
    /// Get the staging grace period as a Duration.
    pub fn staging_grace_period(&self) -> Duration {
        let secs = i64::try_from(self.staging_grace_period_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Quota ledger configuration.
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Administrative identity configuration.
    #[serde(default)]
    pub admin: AdminConfig,
    /// Startup reconciliation configuration.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// and a dummy admin token.
    pub fn for_testing() -> Self {
        Self {
            admin: AdminConfig::for_testing(),
            reconcile: ReconcileConfig {
                on_startup: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.quota.validate()?;
        self.admin.validate()?;
        Ok(())
    }
}
