//! Quota administration.

use crate::auth::{AuthenticatedUser, require_admin, require_identity};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Extension, Query, State};
use depot_core::Identity;
use depot_metadata::models::QuotaRow;
use serde::{Deserialize, Serialize};

/// Quota lookup parameters.
#[derive(Debug, Deserialize)]
pub struct QuotaQuery {
    pub user: String,
    pub token: Option<String>,
}

/// Quota update request.
#[derive(Debug, Deserialize)]
pub struct SetQuotaRequest {
    pub token: Option<String>,
    pub user: String,
    /// New limit in bytes; negative values are rejected.
    pub quota: i64,
}

/// Quota ledger entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuotaResponse {
    pub user: String,
    pub quota: u64,
    pub used: u64,
    pub left: u64,
}

impl From<QuotaRow> for QuotaResponse {
    fn from(row: QuotaRow) -> Self {
        Self {
            quota: row.limit(),
            used: row.used(),
            left: row.left(),
            user: row.owner,
        }
    }
}

/// GET /v1/quota?user=&token= - Read an owner's quota. Admin only.
pub async fn get_quota(
    State(state): State<AppState>,
    Query(params): Query<QuotaQuery>,
    bearer: Option<Extension<AuthenticatedUser>>,
) -> ApiResult<Json<QuotaResponse>> {
    let caller = require_identity(
        &state,
        bearer.as_ref().map(|Extension(user)| user),
        params.token.as_deref(),
    )
    .await?;
    require_admin(&state, &caller)?;

    let user = Identity::parse(params.user)?;
    let row = state.metadata.get_quota(user.as_str()).await?;
    Ok(Json(row.into()))
}

/// POST /v1/quota - Set an owner's limit. Admin only.
pub async fn set_quota(
    State(state): State<AppState>,
    bearer: Option<Extension<AuthenticatedUser>>,
    Json(request): Json<SetQuotaRequest>,
) -> ApiResult<Json<QuotaResponse>> {
    let caller = require_identity(
        &state,
        bearer.as_ref().map(|Extension(user)| user),
        request.token.as_deref(),
    )
    .await?;
    require_admin(&state, &caller)?;

    let user = Identity::parse(request.user)?;
    if request.quota < 0 {
        return Err(ApiError::BadRequest(format!(
            "quota must be non-negative, got {}",
            request.quota
        )));
    }

    let row = state.metadata.set_quota(user.as_str(), request.quota).await?;
    tracing::info!(admin = %caller, user = %user, limit = request.quota, "Quota set");
    Ok(Json(row.into()))
}
