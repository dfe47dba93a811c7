//! Authentication and authorization.
//!
//! Tokens are resolved to identities through the [`TokenChecker`] capability.
//! A bearer token is checked once by [`auth_middleware`]; handlers that also
//! accept a `token` parameter in the query string, JSON body or multipart form
//! go through [`authenticate`], where an explicit parameter wins.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use depot_core::hash::sha256_hex;
use depot_core::{ArtifactHash, Identity};
use depot_metadata::MetadataStore;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value, keeping at most
    /// `MAX_TRACE_ID_LEN` printable ASCII characters.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    /// Get the trace ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolves a raw token to the identity it was issued to.
#[async_trait]
pub trait TokenChecker: Send + Sync {
    /// Returns `None` for unknown, expired or revoked tokens.
    async fn check_token(&self, token: &str) -> ApiResult<Option<Identity>>;
}

/// Token checker backed by the token table of the metadata store.
pub struct MetadataTokenChecker {
    metadata: Arc<dyn MetadataStore>,
}

impl MetadataTokenChecker {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }
}

#[async_trait]
impl TokenChecker for MetadataTokenChecker {
    async fn check_token(&self, token: &str) -> ApiResult<Option<Identity>> {
        let token_hash = sha256_hex(token.as_bytes());
        let Some(row) = self.metadata.get_token_by_hash(&token_hash).await? else {
            return Ok(None);
        };

        let now = OffsetDateTime::now_utc();
        if !row.is_active(now) {
            tracing::debug!(token_id = %row.token_id, "Rejected expired or revoked token");
            return Ok(None);
        }

        let identity = Identity::parse(row.identity.as_str()).map_err(|e| {
            ApiError::Internal(format!("token {} has an invalid identity: {e}", row.token_id))
        })?;

        // Update last used time (fire and forget)
        let metadata = self.metadata.clone();
        let token_id = row.token_id;
        tokio::spawn(async move {
            if let Err(e) = metadata.touch_token(token_id, now).await {
                tracing::warn!(token_id = %token_id, error = %e, "Failed to record token use");
            }
        });

        Ok(Some(identity))
    }
}

/// Authenticated request extension, set by [`auth_middleware`].
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub identity: Identity,
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Authentication middleware that validates bearer tokens and sets up trace context.
///
/// Requests without a bearer token pass through anonymously; a bearer token
/// that does not resolve is rejected.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    if let Some(token) = extract_bearer_token(&req) {
        let identity = state
            .tokens
            .check_token(token)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("invalid token".to_string()))?;
        req.extensions_mut().insert(AuthenticatedUser { identity });
    }

    let response = next
        .run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await;

    Ok(response)
}

/// Resolve the caller: an explicit `token` parameter if given, otherwise the
/// bearer identity. Returns `None` for anonymous callers.
pub async fn authenticate(
    state: &AppState,
    bearer: Option<&AuthenticatedUser>,
    token: Option<&str>,
) -> ApiResult<Option<Identity>> {
    match token.map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) => match state.tokens.check_token(token).await? {
            Some(identity) => Ok(Some(identity)),
            None => Err(ApiError::Unauthorized("invalid token".to_string())),
        },
        None => Ok(bearer.map(|user| user.identity.clone())),
    }
}

/// Like [`authenticate`], but anonymous callers are rejected.
pub async fn require_identity(
    state: &AppState,
    bearer: Option<&AuthenticatedUser>,
    token: Option<&str>,
) -> ApiResult<Identity> {
    authenticate(state, bearer, token)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}

/// Ownership gate for mutations: `NotFound` if the artifact does not exist,
/// `Forbidden` if `identity` is not its owner.
pub async fn require_owner(
    state: &AppState,
    identity: &Identity,
    hash: &ArtifactHash,
) -> ApiResult<()> {
    if state.metadata.check_owner(identity.as_str(), hash).await? {
        return Ok(());
    }
    if state.metadata.artifact_exists(hash).await? {
        tracing::info!(caller = %identity, hash = %hash, "Rejected mutation by non-owner");
        Err(ApiError::Forbidden("only the owner may modify this artifact".to_string()))
    } else {
        Err(ApiError::NotFound(format!("artifact {hash}")))
    }
}

/// Only the configured administrative identity may read or set quotas.
pub fn require_admin(state: &AppState, identity: &Identity) -> ApiResult<()> {
    if identity.as_str() == state.config.admin.identity {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "quota administration requires the admin identity".to_string(),
        ))
    }
}
