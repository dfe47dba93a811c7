//! Upload pipeline.
//!
//! An upload moves through `Unauthenticated → QuotaAdmitted → Streaming →
//! Hashed → Committed`, and may be rejected from any state. Each state is a
//! type here, so a stage can only be entered from the one before it:
//!
//! - [`Admitted`]: owner resolved and quota reserved.
//! - [`Streaming`]: bytes are copied into a staging object under the ceiling.
//! - [`Staged`]: the staging object is complete and durable.
//! - [`Hashed`]: the content hash is known.
//!
//! Every rejection after admission removes the staging object and releases
//! the reservation before returning.

use crate::error::{ApiError, ApiResult};
use crate::locks::HashLocks;
use crate::metrics;
use crate::quota::QuotaReservation;
use crate::state::AppState;
use bytes::Bytes;
use depot_core::{Artifact, ArtifactHash, ArtifactKind, Identity, STAGING_KEY_PREFIX};
use depot_metadata::models::CommitOutcome;
use depot_storage::{ObjectStore, StreamingUpload};
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use uuid::Uuid;

/// Result of a committed upload.
#[derive(Debug)]
pub struct UploadOutcome {
    pub artifact: Artifact,
    pub commit: CommitOutcome,
}

/// Upload whose owner is known and whose quota is reserved.
pub struct Admitted {
    storage: Arc<dyn ObjectStore>,
    locks: Arc<HashLocks>,
    reservation: QuotaReservation,
    started: Instant,
}

/// Upload copying bytes into its staging object.
pub struct Streaming {
    storage: Arc<dyn ObjectStore>,
    locks: Arc<HashLocks>,
    reservation: QuotaReservation,
    staging_key: String,
    upload: Box<dyn StreamingUpload>,
    started: Instant,
}

/// Upload whose bytes are durable in the staging object.
pub struct Staged {
    storage: Arc<dyn ObjectStore>,
    locks: Arc<HashLocks>,
    reservation: QuotaReservation,
    staging_key: String,
    size: u64,
    started: Instant,
}

/// Upload whose content hash is known.
pub struct Hashed {
    storage: Arc<dyn ObjectStore>,
    locks: Arc<HashLocks>,
    reservation: QuotaReservation,
    staging_key: String,
    size: u64,
    hash: ArtifactHash,
    started: Instant,
}

/// Admit an upload: reserve `declared_length` bytes of `owner`'s quota.
pub async fn admit(
    state: &AppState,
    owner: Identity,
    declared_length: Option<u64>,
) -> ApiResult<Admitted> {
    let reservation = QuotaReservation::admit(state.metadata.clone(), owner, declared_length)
        .await
        .inspect_err(|e| {
            if matches!(e, ApiError::QuotaExceeded { .. }) {
                metrics::record_upload_rejection("quota_exceeded");
            }
        })?;

    Ok(Admitted {
        storage: state.storage.clone(),
        locks: state.hash_locks.clone(),
        reservation,
        started: Instant::now(),
    })
}

impl Admitted {
    /// Open a fresh staging object.
    pub async fn open(self) -> ApiResult<Streaming> {
        let staging_key = format!("{STAGING_KEY_PREFIX}{}", Uuid::new_v4());
        let upload = match self.storage.put_stream(&staging_key).await {
            Ok(upload) => upload,
            Err(e) => {
                metrics::record_upload_rejection("storage_fault");
                release(self.reservation).await;
                return Err(e.into());
            }
        };

        Ok(Streaming {
            storage: self.storage,
            locks: self.locks,
            reservation: self.reservation,
            staging_key,
            upload,
            started: self.started,
        })
    }
}

impl Streaming {
    /// Copy `source` into the staging object and make it durable.
    ///
    /// A source that yields more than the reservation's ceiling is rejected
    /// with `QuotaExceeded`; a source error is returned as the source
    /// converts it. A source of exactly the ceiling is accepted.
    pub async fn copy_from<S, E>(mut self, source: S) -> ApiResult<Staged>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<ApiError>,
    {
        let ceiling = self.reservation.ceiling();
        let mut source = std::pin::pin!(source);

        while let Some(chunk) = source.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let err: ApiError = e.into();
                    return Err(self.abort(err.code(), err).await);
                }
            };

            let written = self.upload.bytes_written() + chunk.len() as u64;
            if written > ceiling {
                tracing::info!(
                    owner = %self.reservation.owner(),
                    ceiling,
                    "Upload exceeded its quota ceiling"
                );
                let err = ApiError::QuotaExceeded {
                    requested: written,
                    available: ceiling,
                };
                return Err(self.abort("quota_exceeded", err).await);
            }

            if let Err(e) = self.upload.write(chunk).await {
                return Err(self.abort("storage_fault", e.into()).await);
            }
        }

        let Streaming {
            storage,
            locks,
            reservation,
            staging_key,
            upload,
            started,
        } = self;

        match upload.finish().await {
            Ok(size) => Ok(Staged {
                storage,
                locks,
                reservation,
                staging_key,
                size,
                started,
            }),
            Err(e) => {
                metrics::record_upload_rejection("storage_fault");
                discard(storage.as_ref(), &staging_key).await;
                release(reservation).await;
                Err(e.into())
            }
        }
    }

    async fn abort(self, reason: &str, err: ApiError) -> ApiError {
        metrics::record_upload_rejection(reason);
        if let Err(e) = self.upload.abort().await {
            tracing::warn!(staging_key = %self.staging_key, error = %e, "Failed to abort staging upload");
        }
        release(self.reservation).await;
        err
    }
}

impl Staged {
    /// Size of the staged content.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Hash the staged object.
    ///
    /// A read failure is a `HashFault`: the staging object is removed and the
    /// reservation released.
    pub async fn hash(self) -> ApiResult<Hashed> {
        match hash_object(self.storage.as_ref(), &self.staging_key).await {
            Ok(hash) => Ok(Hashed {
                storage: self.storage,
                locks: self.locks,
                reservation: self.reservation,
                staging_key: self.staging_key,
                size: self.size,
                hash,
                started: self.started,
            }),
            Err(e) => {
                metrics::record_upload_rejection("hash_fault");
                discard(self.storage.as_ref(), &self.staging_key).await;
                release(self.reservation).await;
                Err(ApiError::HashFault(e))
            }
        }
    }
}

impl Hashed {
    /// Content hash.
    pub fn hash(&self) -> &ArtifactHash {
        &self.hash
    }

    /// Promote the staging object to its content-addressed key and commit the
    /// record, search entry and quota settlement.
    ///
    /// An existing object under the key means the content is already stored;
    /// the staging copy is dropped and the upload proceeds as a dedup. Both
    /// steps hold the hash lock, so a delete of the same content cannot
    /// remove the object between them.
    pub async fn commit(
        self,
        name: String,
        kind: ArtifactKind,
        attributes: BTreeMap<String, String>,
    ) -> ApiResult<UploadOutcome> {
        let _lock = self.locks.lock(&self.hash).await;
        let object_key = self.hash.object_key();
        match self.storage.promote(&self.staging_key, &object_key).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(hash = %self.hash, "Content already stored, staging copy dropped");
            }
            Err(e) => {
                metrics::record_upload_rejection("storage_fault");
                discard(self.storage.as_ref(), &self.staging_key).await;
                release(self.reservation).await;
                return Err(e.into());
            }
        }

        let artifact = Artifact {
            hash: self.hash,
            name,
            owner: self.reservation.owner().clone(),
            kind,
            size: self.size,
            created_at: OffsetDateTime::now_utc(),
            attributes,
        };

        // A failed commit leaves the promoted object in place: another record
        // may already reference it, and the reconciliation sweep removes it
        // otherwise.
        let commit = self.reservation.redeem(&artifact).await.inspect_err(|e| {
            if matches!(e, ApiError::QuotaExceeded { .. }) {
                metrics::record_upload_rejection("quota_exceeded");
            } else {
                metrics::record_upload_rejection("storage_fault");
            }
        })?;

        metrics::UPLOADS_COMMITTED.inc();
        metrics::BYTES_UPLOADED.inc_by(artifact.size);
        if commit.deduplicated {
            metrics::UPLOADS_DEDUPLICATED.inc();
        }
        metrics::UPLOAD_DURATION.observe(self.started.elapsed().as_secs_f64());

        tracing::info!(
            owner = %artifact.owner,
            hash = %artifact.hash,
            name = %artifact.name,
            kind = %artifact.kind,
            size = artifact.size,
            deduplicated = commit.deduplicated,
            charged = commit.charged,
            "Upload committed"
        );

        Ok(UploadOutcome { artifact, commit })
    }
}

/// Stream an object through the content hasher.
async fn hash_object(storage: &dyn ObjectStore, key: &str) -> Result<ArtifactHash, String> {
    let mut stream = storage.get_stream(key).await.map_err(|e| e.to_string())?;
    let mut hasher = ArtifactHash::hasher();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        hasher.update(&chunk);
    }
    Ok(hasher.finalize())
}

async fn discard(storage: &dyn ObjectStore, staging_key: &str) {
    match storage.delete(staging_key).await {
        Ok(()) | Err(depot_storage::StorageError::NotFound(_)) => {}
        Err(e) => {
            tracing::warn!(staging_key = %staging_key, error = %e, "Failed to remove staging object");
        }
    }
}

async fn release(reservation: QuotaReservation) {
    if let Err(e) = reservation.release().await {
        tracing::error!(error = %e, "Failed to release quota reservation");
    }
}
