//! Artifact endpoints: upload, listing, lookup, attribute edits, deletion
//! and download.

use crate::auth::{AuthenticatedUser, authenticate, require_identity, require_owner};
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use crate::upload;
use axum::Json;
use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{Extension, Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use depot_core::artifact::{validate_attribute, validate_name};
use depot_core::{Artifact, ArtifactHash, ArtifactKind, Identity};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Query parameters that identify an artifact.
#[derive(Debug, Default, Deserialize)]
pub struct ArtifactQuery {
    /// Content hash (hex).
    pub id: Option<String>,
    /// Display name, resolved to its latest version where accepted.
    pub name: Option<String>,
    /// Caller token, as an alternative to a bearer header.
    pub token: Option<String>,
}

impl ArtifactQuery {
    fn require_id(&self) -> ApiResult<ArtifactHash> {
        let id = self
            .id
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("missing id parameter".to_string()))?;
        Ok(ArtifactHash::from_hex(id)?)
    }
}

/// Query parameters carrying only a caller token.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Upload response.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub hash: String,
    pub name: String,
    pub kind: ArtifactKind,
    pub size: u64,
    pub owner: String,
    /// The content was already stored under this hash.
    pub deduplicated: bool,
}

/// POST /v1/artifacts/{kind} - Upload an artifact as multipart form data.
///
/// Fields: `token` (unless a bearer header or `token` query parameter is
/// given), the kind's attribute fields, then `file`. Fields after `file` are
/// not read. The request `Content-Length`, when present, is the declared
/// length reserved against the caller's quota before any byte is stored.
pub async fn upload_artifact(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<TokenQuery>,
    bearer: Option<Extension<AuthenticatedUser>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let kind = ArtifactKind::parse(&kind)?;
    let declared_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut token = params.token;
    let mut attributes = BTreeMap::new();

    while let Some(field) = multipart.next_field().await.map_err(malformed_body)? {
        let Some(field_name) = field.name().map(str::to_string) else {
            continue;
        };

        match field_name.as_str() {
            "token" => {
                token = Some(field.text().await.map_err(malformed_body)?);
            }
            "file" => {
                let name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::BadRequest("file field has no filename".to_string()))?;
                validate_name(&name)?;

                let owner = require_identity(
                    &state,
                    bearer.as_ref().map(|Extension(user)| user),
                    token.as_deref(),
                )
                .await?;

                let staged = upload::admit(&state, owner, declared_length)
                    .await?
                    .open()
                    .await?
                    .copy_from(field.map(|chunk| chunk.map_err(interrupted_body)))
                    .await?;
                let outcome = staged.hash().await?.commit(name, kind, attributes).await?;

                let status = if outcome.commit.deduplicated {
                    StatusCode::OK
                } else {
                    StatusCode::CREATED
                };
                let artifact = outcome.artifact;
                return Ok((
                    status,
                    Json(UploadResponse {
                        hash: artifact.hash.to_hex(),
                        name: artifact.name,
                        kind: artifact.kind,
                        size: artifact.size,
                        owner: artifact.owner.into_inner(),
                        deduplicated: outcome.commit.deduplicated,
                    }),
                ));
            }
            key if kind.upload_attribute_keys().contains(&key) => {
                let value = field.text().await.map_err(malformed_body)?;
                validate_attribute(key, &value)?;
                attributes.insert(key.to_string(), value);
            }
            other => {
                tracing::debug!(field = %other, kind = %kind, "Ignoring unknown upload field");
            }
        }
    }

    Err(ApiError::BadRequest("missing file field".to_string()))
}

/// A body cut off by the server's size limit is 413; anything else is a
/// malformed request.
fn malformed_body(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(format!("malformed multipart body: {}", err.body_text()))
    }
}

/// Like [`malformed_body`], for failures while the file itself streams in.
fn interrupted_body(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::IoFault(err.body_text())
    }
}

/// GET /v1/artifacts/{kind} - List the artifacts of one kind the caller may
/// download.
pub async fn list_artifacts(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<TokenQuery>,
    bearer: Option<Extension<AuthenticatedUser>>,
) -> ApiResult<Json<Vec<Artifact>>> {
    let kind = ArtifactKind::parse(&kind)?;
    let caller = authenticate(
        &state,
        bearer.as_ref().map(|Extension(user)| user),
        params.token.as_deref(),
    )
    .await?;

    let mut visible = Vec::new();
    for artifact in state.metadata.list_artifacts_by_kind(kind).await? {
        if state
            .metadata
            .can_access(caller.as_ref().map(Identity::as_str), &artifact.hash)
            .await?
        {
            visible.push(artifact);
        }
    }

    Ok(Json(visible))
}

/// GET /v1/artifacts/info?id=&token= - Attribute view of one artifact.
///
/// Shared artifacts are described only to their owner and grantees.
pub async fn get_artifact_info(
    State(state): State<AppState>,
    Query(params): Query<ArtifactQuery>,
    bearer: Option<Extension<AuthenticatedUser>>,
) -> ApiResult<Json<BTreeMap<String, String>>> {
    let hash = params.require_id()?;
    let caller = authenticate(
        &state,
        bearer.as_ref().map(|Extension(user)| user),
        params.token.as_deref(),
    )
    .await?;

    let attributes = state
        .metadata
        .get_attributes(&hash)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("artifact {hash}")))?;
    ensure_readable(&state, caller.as_ref(), &hash).await?;

    Ok(Json(attributes))
}

/// Read gate shared by info and download: 401 for anonymous callers and 403
/// for identities outside a shared artifact's scope.
pub(crate) async fn ensure_readable(
    state: &AppState,
    caller: Option<&Identity>,
    hash: &ArtifactHash,
) -> ApiResult<()> {
    if state
        .metadata
        .can_access(caller.map(Identity::as_str), hash)
        .await?
    {
        return Ok(());
    }
    Err(match caller {
        None => ApiError::Unauthorized("this artifact requires a token".to_string()),
        Some(_) => ApiError::Forbidden("this artifact has not been shared with you".to_string()),
    })
}

/// Attribute append request.
#[derive(Debug, Deserialize)]
pub struct AttributesRequest {
    pub token: Option<String>,
    pub id: String,
    pub attributes: BTreeMap<String, String>,
}

/// Attribute append response.
#[derive(Debug, Serialize, Deserialize)]
pub struct AttributesResponse {
    pub hash: String,
    /// Number of keys added; existing keys are left untouched.
    pub added: u64,
}

/// POST /v1/artifacts/attributes - Add extension attributes. Owner only.
pub async fn append_attributes(
    State(state): State<AppState>,
    bearer: Option<Extension<AuthenticatedUser>>,
    Json(request): Json<AttributesRequest>,
) -> ApiResult<Json<AttributesResponse>> {
    let hash = ArtifactHash::from_hex(&request.id)?;
    let identity = require_identity(
        &state,
        bearer.as_ref().map(|Extension(user)| user),
        request.token.as_deref(),
    )
    .await?;
    for (key, value) in &request.attributes {
        validate_attribute(key, value)?;
    }

    let _lock = state.hash_locks.lock(&hash).await;
    require_owner(&state, &identity, &hash).await?;

    let added = state
        .metadata
        .append_attributes(&hash, &request.attributes)
        .await?;

    tracing::info!(owner = %identity, hash = %hash, added, "Attributes appended");

    Ok(Json(AttributesResponse {
        hash: hash.to_hex(),
        added,
    }))
}

/// Delete response.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub hash: String,
    pub name: String,
    /// Bytes returned to the owner's quota.
    pub freed: u64,
}

/// DELETE /v1/artifacts?id=&token= - Delete an artifact. Owner only.
pub async fn delete_artifact(
    State(state): State<AppState>,
    Query(params): Query<ArtifactQuery>,
    bearer: Option<Extension<AuthenticatedUser>>,
) -> ApiResult<Json<DeleteResponse>> {
    let hash = params.require_id()?;
    let identity = require_identity(
        &state,
        bearer.as_ref().map(|Extension(user)| user),
        params.token.as_deref(),
    )
    .await?;

    // Held until the object is gone, so no upload of the same content can
    // commit a record in between.
    let _lock = state.hash_locks.lock(&hash).await;
    require_owner(&state, &identity, &hash).await?;

    let removed = state
        .metadata
        .delete_artifact(&hash, identity.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("artifact {hash}")))?;

    // The record is gone; an object left behind here is an orphan the
    // reconciliation sweep removes.
    match state.storage.delete(&hash.object_key()).await {
        Ok(()) | Err(depot_storage::StorageError::NotFound(_)) => {}
        Err(e) => {
            tracing::warn!(hash = %hash, error = %e, "Failed to delete artifact object");
        }
    }

    metrics::ARTIFACTS_DELETED.inc();
    tracing::info!(owner = %identity, hash = %hash, size = removed.size, "Artifact deleted");

    Ok(Json(DeleteResponse {
        hash: hash.to_hex(),
        name: removed.name,
        freed: removed.size,
    }))
}

/// GET /v1/artifacts/download?id=|name=&token= - Stream an artifact's content.
///
/// With `name`, the latest version under that name is served. Artifacts that
/// have been shared are only served to their owner and grantees.
pub async fn download_artifact(
    State(state): State<AppState>,
    Query(params): Query<ArtifactQuery>,
    bearer: Option<Extension<AuthenticatedUser>>,
) -> ApiResult<Response> {
    let hash = match (&params.id, &params.name) {
        (Some(_), _) => params.require_id()?,
        (None, Some(name)) => state.metadata.last_hash(name).await?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "one of id or name is required".to_string(),
            ));
        }
    };

    let caller = authenticate(
        &state,
        bearer.as_ref().map(|Extension(user)| user),
        params.token.as_deref(),
    )
    .await?;

    let artifact = state
        .metadata
        .get_artifact(&hash)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("artifact {hash}")))?;

    ensure_readable(&state, caller.as_ref(), &hash).await?;

    let stream = state.storage.get_stream(&hash.object_key()).await?;
    let body_stream = stream.map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

    metrics::DOWNLOADS_SERVED.inc();

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(artifact.size));
    headers.insert(CONTENT_DISPOSITION, content_disposition(&artifact));

    Ok((StatusCode::OK, headers, Body::from_stream(body_stream)).into_response())
}

/// `attachment; filename="<name>"`, falling back to the hash for names that
/// are not valid header text.
fn content_disposition(artifact: &Artifact) -> HeaderValue {
    let filename = artifact.name.replace('"', "_");
    HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or_else(|_| {
            HeaderValue::from_str(&format!("attachment; filename=\"{}\"", artifact.hash))
                .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
        })
}

/// Latest-version response.
#[derive(Debug, Serialize, Deserialize)]
pub struct LatestResponse {
    pub name: String,
    pub hash: String,
}

/// GET /v1/artifacts/latest?name= - Hash of the most recent upload under a name.
pub async fn latest_artifact(
    State(state): State<AppState>,
    Query(params): Query<ArtifactQuery>,
) -> ApiResult<Json<LatestResponse>> {
    let name = params
        .name
        .ok_or_else(|| ApiError::BadRequest("missing name parameter".to_string()))?;
    let hash = state.metadata.last_hash(&name).await?;
    Ok(Json(LatestResponse {
        name,
        hash: hash.to_hex(),
    }))
}
