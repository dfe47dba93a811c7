//! Admin token initialization.

use anyhow::{Result, bail};
use depot_core::config::AdminConfig;
use depot_metadata::MetadataStore;
use depot_metadata::models::TokenRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Ensure the configured admin token exists, rotating the previous one if needed.
///
/// If the token hash changes between restarts, the admin identity's previous
/// tokens are revoked and a new one is created with the new hash. Nothing
/// happens when no hash is configured.
pub async fn ensure_admin_token(metadata: &dyn MetadataStore, config: &AdminConfig) -> Result<()> {
    let Some(configured) = config.token_hash.as_deref() else {
        tracing::info!("No admin token configured, quota administration disabled");
        return Ok(());
    };

    // Tokens are looked up by lowercase hex.
    let hash = configured
        .strip_prefix("sha256:")
        .unwrap_or(configured)
        .to_lowercase();
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid admin token_hash: expected 64 hex chars");
    }

    let now = OffsetDateTime::now_utc();
    if let Some(existing) = metadata.get_token_by_hash(&hash).await? {
        if existing.revoked_at.is_some() {
            bail!(
                "admin token hash matches a revoked token (id={}); use a new token hash",
                existing.token_id
            );
        }
        if let Some(expires_at) = existing.expires_at
            && expires_at <= now
        {
            bail!(
                "admin token hash matches an expired token (id={}, expired={}); \
                 use a new token hash",
                existing.token_id,
                expires_at
            );
        }
        if existing.identity != config.identity {
            bail!(
                "admin token hash is already issued to another identity (id={})",
                existing.token_id
            );
        }
        tracing::debug!("Admin token already exists");
        return Ok(());
    }

    for previous in metadata.list_tokens_for_identity(&config.identity).await? {
        if previous.is_active(now) {
            metadata.revoke_token(previous.token_id, now).await?;
            tracing::info!(token_id = %previous.token_id, "Previous admin token revoked");
        }
    }

    let token = TokenRow {
        token_id: Uuid::new_v4(),
        identity: config.identity.clone(),
        token_hash: hash,
        expires_at: None,
        revoked_at: None,
        created_at: now,
        last_used_at: None,
        description: config.token_description.clone(),
    };
    metadata.create_token(&token).await?;
    tracing::info!(token_id = %token.token_id, identity = %token.identity, "Admin token created");

    Ok(())
}
