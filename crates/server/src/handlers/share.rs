//! Sharing scopes.

use super::artifacts::ArtifactQuery;
use crate::auth::{AuthenticatedUser, require_identity, require_owner};
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Extension, Query, State};
use depot_core::{ArtifactHash, Identity};
use serde::{Deserialize, Serialize};

/// Scope update request.
#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    pub token: Option<String>,
    pub id: String,
    /// Identities to grant read access.
    #[serde(default)]
    pub add: Vec<String>,
    /// Identities to revoke.
    #[serde(default)]
    pub remove: Vec<String>,
}

/// Current scope of an artifact.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScopeResponse {
    pub hash: String,
    /// Grantees, sorted. Empty means the artifact is public.
    pub scope: Vec<String>,
}

/// POST /v1/share - Grant and revoke read access. Owner only.
///
/// Grants are applied before revocations.
pub async fn update_scope(
    State(state): State<AppState>,
    bearer: Option<Extension<AuthenticatedUser>>,
    Json(request): Json<ShareRequest>,
) -> ApiResult<Json<ScopeResponse>> {
    let hash = ArtifactHash::from_hex(&request.id)?;
    let owner = require_identity(
        &state,
        bearer.as_ref().map(|Extension(user)| user),
        request.token.as_deref(),
    )
    .await?;
    let add = parse_identities(&request.add)?;
    let remove = parse_identities(&request.remove)?;

    // Ownership cannot change hands while the batch is applied.
    let _lock = state.hash_locks.lock(&hash).await;
    require_owner(&state, &owner, &hash).await?;

    for grantee in &add {
        if state
            .metadata
            .share_with(&hash, owner.as_str(), grantee.as_str())
            .await?
        {
            tracing::info!(owner = %owner, hash = %hash, grantee = %grantee, "Artifact shared");
        }
    }
    for grantee in &remove {
        if state
            .metadata
            .unshare_with(&hash, owner.as_str(), grantee.as_str())
            .await?
        {
            tracing::info!(owner = %owner, hash = %hash, grantee = %grantee, "Artifact unshared");
        }
    }

    let scope = state.metadata.get_scope(&hash, owner.as_str()).await?;
    Ok(Json(ScopeResponse {
        hash: hash.to_hex(),
        scope,
    }))
}

/// GET /v1/share?id=&token= - Current scope. Owner only.
pub async fn get_scope(
    State(state): State<AppState>,
    Query(params): Query<ArtifactQuery>,
    bearer: Option<Extension<AuthenticatedUser>>,
) -> ApiResult<Json<ScopeResponse>> {
    let hash = match params.id.as_deref() {
        Some(id) => ArtifactHash::from_hex(id)?,
        None => {
            return Err(crate::error::ApiError::BadRequest(
                "missing id parameter".to_string(),
            ));
        }
    };
    let owner = require_identity(
        &state,
        bearer.as_ref().map(|Extension(user)| user),
        params.token.as_deref(),
    )
    .await?;
    require_owner(&state, &owner, &hash).await?;

    let scope = state.metadata.get_scope(&hash, owner.as_str()).await?;
    Ok(Json(ScopeResponse {
        hash: hash.to_hex(),
        scope,
    }))
}

fn parse_identities(raw: &[String]) -> ApiResult<Vec<Identity>> {
    raw.iter()
        .map(|s| Identity::parse(s.as_str()).map_err(Into::into))
        .collect()
}
