//! Startup reconciliation between the object store and the metadata store.
//!
//! A crash can leave the two stores disagreeing: staging objects from
//! interrupted uploads, promoted objects whose commit never landed, or usage
//! counters that drifted from the records they summarize. The sweep removes
//! the first two and rewrites the third. Records whose object is missing are
//! only reported; deleting them would hide data loss.

use crate::metrics::RECONCILE_OBJECTS_REMOVED;
use anyhow::{Context, Result};
use depot_core::config::ReconcileConfig;
use depot_core::{ARTIFACT_KEY_PREFIX, ArtifactHash, STAGING_KEY_PREFIX};
use depot_metadata::MetadataStore;
use depot_storage::ObjectStore;
use serde::Serialize;
use time::OffsetDateTime;

/// Result of a reconciliation sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// Abandoned staging objects removed.
    pub staging_removed: u64,
    /// Promoted objects with no record, removed.
    pub orphans_removed: u64,
    /// Records whose object is missing.
    pub missing_objects: u64,
    /// Owners whose usage counter was rewritten.
    pub usage_corrections: u64,
    /// Per-object failures that were logged and skipped.
    pub errors: u64,
}

/// Run one reconciliation sweep.
pub async fn reconcile(
    storage: &dyn ObjectStore,
    metadata: &dyn MetadataStore,
    config: &ReconcileConfig,
) -> Result<ReconcileStats> {
    let mut stats = ReconcileStats::default();
    let dry_run = config.dry_run;

    sweep_staging(storage, config, &mut stats).await?;
    sweep_orphans(storage, metadata, dry_run, &mut stats).await?;

    let records = metadata
        .list_artifacts()
        .await
        .context("failed to list artifact records")?;
    for hex in records.keys() {
        let Ok(hash) = ArtifactHash::from_hex(hex) else {
            continue;
        };
        match storage.exists(&hash.object_key()).await {
            Ok(true) => {}
            Ok(false) => {
                stats.missing_objects += 1;
                tracing::error!(hash = %hash, "Artifact record has no stored object");
            }
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(hash = %hash, error = %e, "Failed to check artifact object");
            }
        }
    }

    if dry_run {
        tracing::info!("Dry run: usage counters left unchanged");
    } else {
        let corrections = metadata
            .recompute_usage()
            .await
            .context("failed to recompute quota usage")?;
        for correction in &corrections {
            tracing::warn!(
                owner = %correction.owner,
                recorded = correction.recorded,
                actual = correction.actual,
                "Quota usage corrected"
            );
        }
        stats.usage_corrections = corrections.len() as u64;
    }

    tracing::info!(
        staging_removed = stats.staging_removed,
        orphans_removed = stats.orphans_removed,
        missing_objects = stats.missing_objects,
        usage_corrections = stats.usage_corrections,
        errors = stats.errors,
        dry_run,
        "Reconciliation finished"
    );
    Ok(stats)
}

async fn sweep_staging(
    storage: &dyn ObjectStore,
    config: &ReconcileConfig,
    stats: &mut ReconcileStats,
) -> Result<()> {
    let cutoff = OffsetDateTime::now_utc() - config.staging_grace_period();
    let keys = storage
        .list(STAGING_KEY_PREFIX)
        .await
        .context("failed to list staging objects")?;

    for key in keys {
        let meta = match storage.head(&key).await {
            Ok(meta) => meta,
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(key = %key, error = %e, "Failed to stat staging object");
                continue;
            }
        };
        // Objects without a timestamp are treated as old.
        if meta.last_modified.is_some_and(|modified| modified > cutoff) {
            continue;
        }

        if config.dry_run {
            tracing::info!(key = %key, "Dry run: would remove staging object");
            stats.staging_removed += 1;
            continue;
        }
        match storage.delete(&key).await {
            Ok(()) => {
                stats.staging_removed += 1;
                RECONCILE_OBJECTS_REMOVED
                    .with_label_values(&["staging"])
                    .inc();
                tracing::info!(key = %key, "Removed abandoned staging object");
            }
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(key = %key, error = %e, "Failed to remove staging object");
            }
        }
    }
    Ok(())
}

async fn sweep_orphans(
    storage: &dyn ObjectStore,
    metadata: &dyn MetadataStore,
    dry_run: bool,
    stats: &mut ReconcileStats,
) -> Result<()> {
    let keys = storage
        .list(ARTIFACT_KEY_PREFIX)
        .await
        .context("failed to list artifact objects")?;

    for key in keys {
        let Some(hex) = key.strip_prefix(ARTIFACT_KEY_PREFIX) else {
            continue;
        };
        let hash = match ArtifactHash::from_hex(hex) {
            Ok(hash) => hash,
            Err(_) => {
                tracing::warn!(key = %key, "Skipping object with unparsable key");
                continue;
            }
        };

        match metadata.artifact_exists(&hash).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(hash = %hash, error = %e, "Failed to look up artifact record");
                continue;
            }
        }

        if dry_run {
            tracing::info!(key = %key, "Dry run: would remove orphaned object");
            stats.orphans_removed += 1;
            continue;
        }
        match storage.delete(&key).await {
            Ok(()) => {
                stats.orphans_removed += 1;
                RECONCILE_OBJECTS_REMOVED.with_label_values(&["orphan"]).inc();
                tracing::info!(key = %key, "Removed orphaned object");
            }
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(key = %key, error = %e, "Failed to remove orphaned object");
            }
        }
    }
    Ok(())
}
