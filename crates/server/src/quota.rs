//! Quota reservations for in-flight uploads.

use crate::error::{ApiError, ApiResult};
use depot_core::{Artifact, Identity};
use depot_metadata::models::CommitOutcome;
use depot_metadata::{MetadataError, MetadataStore};
use std::sync::Arc;

/// Quota charged to an owner while their upload is in flight.
///
/// Created by [`QuotaReservation::admit`]. Exactly one of [`redeem`] or
/// [`release`] settles it; a reservation dropped unsettled (an early return,
/// a cancelled request) releases itself on a background task.
///
/// [`redeem`]: QuotaReservation::redeem
/// [`release`]: QuotaReservation::release
pub struct QuotaReservation {
    metadata: Arc<dyn MetadataStore>,
    owner: Identity,
    reserved: u64,
    ceiling: u64,
    settled: bool,
    runtime_handle: Option<tokio::runtime::Handle>,
}

impl std::fmt::Debug for QuotaReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaReservation")
            .field("owner", &self.owner)
            .field("reserved", &self.reserved)
            .field("ceiling", &self.ceiling)
            .field("settled", &self.settled)
            .finish()
    }
}

impl QuotaReservation {
    /// Admit an upload for `owner`.
    ///
    /// With a declared length, that many bytes are charged immediately and
    /// become the ceiling; a length above the remaining quota is rejected with
    /// no side effect. Without one, nothing is charged and the ceiling is the
    /// owner's remaining quota at this moment.
    pub async fn admit(
        metadata: Arc<dyn MetadataStore>,
        owner: Identity,
        declared_length: Option<u64>,
    ) -> ApiResult<Self> {
        let (reserved, ceiling) = match declared_length {
            Some(length) => {
                metadata
                    .reserve_quota(owner.as_str(), length)
                    .await
                    .map_err(quota_error)?;
                (length, length)
            }
            None => (0, metadata.quota_left(owner.as_str()).await?),
        };

        tracing::debug!(owner = %owner, reserved, ceiling, "Upload admitted");

        Ok(Self {
            metadata,
            owner,
            reserved,
            ceiling,
            settled: false,
            runtime_handle: tokio::runtime::Handle::try_current().ok(),
        })
    }

    /// Owner the reservation is charged to.
    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    /// Bytes charged at admission.
    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    /// Largest upload this reservation admits.
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Return the reserved bytes to the owner.
    pub async fn release(mut self) -> ApiResult<()> {
        self.settled = true;
        if self.reserved == 0 {
            return Ok(());
        }
        self.metadata
            .release_quota(self.owner.as_str(), self.reserved)
            .await?;
        tracing::debug!(owner = %self.owner, released = self.reserved, "Quota reservation released");
        Ok(())
    }

    /// Commit `artifact`, swapping the reservation for its final charge in the
    /// same transaction as the record write. On failure the reservation is
    /// released.
    pub async fn redeem(mut self, artifact: &Artifact) -> ApiResult<CommitOutcome> {
        match self.metadata.commit_upload(artifact, self.reserved).await {
            Ok(outcome) => {
                self.settled = true;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(release_err) = self.release().await {
                    tracing::error!(
                        error = %release_err,
                        "Failed to release quota reservation after a failed commit"
                    );
                }
                Err(quota_error(e))
            }
        }
    }
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        if self.settled || self.reserved == 0 {
            return;
        }
        crate::metrics::QUOTA_RESERVATIONS_LEAKED.inc();
        tracing::warn!(
            owner = %self.owner,
            reserved = self.reserved,
            "Quota reservation dropped unsettled, releasing in background"
        );

        let Some(handle) = self.runtime_handle.as_ref() else {
            tracing::warn!(
                owner = %self.owner,
                "No runtime available to release quota; the reconciliation sweep will repair it"
            );
            return;
        };

        let metadata = self.metadata.clone();
        let owner = self.owner.clone();
        let reserved = self.reserved;
        handle.spawn(async move {
            if let Err(e) = metadata.release_quota(owner.as_str(), reserved).await {
                tracing::error!(owner = %owner, error = %e, "Failed to release dropped quota reservation");
            }
        });
    }
}

fn quota_error(err: MetadataError) -> ApiError {
    match err {
        MetadataError::QuotaExceeded {
            requested,
            available,
            ..
        } => ApiError::QuotaExceeded {
            requested,
            available,
        },
        other => other.into(),
    }
}
