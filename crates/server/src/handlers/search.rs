//! Name search.

use crate::auth::{AuthenticatedUser, authenticate};
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Extension, Query, State};
use depot_core::{ArtifactHash, Identity};
use depot_metadata::repos::SearchHit;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Search query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    /// Name prefix; empty or absent matches every name.
    #[serde(default)]
    pub name: String,
    pub token: Option<String>,
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub hash: String,
    pub name: String,
}

/// GET /v1/search?name= - Prefix search over artifact names.
///
/// Results are ordered by name, then by upload time within a name. Each hash
/// appears once, at its most recent entry. Shared artifacts are left out
/// unless the caller is their owner or a grantee.
pub async fn search_artifacts(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    bearer: Option<Extension<AuthenticatedUser>>,
) -> ApiResult<Json<Vec<SearchResult>>> {
    let caller = authenticate(
        &state,
        bearer.as_ref().map(|Extension(user)| user),
        query.token.as_deref(),
    )
    .await?;

    let hits = state.metadata.search_by_prefix(&query.name).await?;
    let mut visible = Vec::new();
    for result in collapse_by_hash(hits) {
        let hash = ArtifactHash::from_hex(&result.hash)?;
        if state
            .metadata
            .can_access(caller.as_ref().map(Identity::as_str), &hash)
            .await?
        {
            visible.push(result);
        }
    }
    Ok(Json(visible))
}

fn collapse_by_hash(hits: Vec<SearchHit>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    let mut results: Vec<SearchResult> = hits
        .into_iter()
        .rev()
        .filter(|hit| seen.insert(hit.hash.clone()))
        .map(|hit| SearchResult {
            hash: hit.hash,
            name: hit.name,
        })
        .collect();
    results.reverse();
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(name: &str, hash: &str, at: i64) -> SearchHit {
        SearchHit {
            name: name.to_string(),
            hash: hash.to_string(),
            created_at_ns: at,
        }
    }

    #[test]
    fn collapse_keeps_latest_entry_per_hash() {
        let hits = vec![
            hit("tpl-a", "aa", 1),
            hit("tpl-a", "bb", 2),
            hit("tpl-a", "aa", 3),
            hit("tpl-b", "cc", 1),
        ];
        let names: Vec<(String, String)> = collapse_by_hash(hits)
            .into_iter()
            .map(|r| (r.name, r.hash))
            .collect();
        assert_eq!(
            names,
            vec![
                ("tpl-a".to_string(), "bb".to_string()),
                ("tpl-a".to_string(), "aa".to_string()),
                ("tpl-b".to_string(), "cc".to_string()),
            ]
        );
    }
}
