//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (intentionally unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        // Artifact records
        .route("/v1/artifacts", delete(handlers::delete_artifact))
        .route("/v1/artifacts/info", get(handlers::get_artifact_info))
        .route("/v1/artifacts/attributes", post(handlers::append_attributes))
        .route("/v1/artifacts/download", get(handlers::download_artifact))
        .route("/v1/artifacts/latest", get(handlers::latest_artifact))
        .route(
            "/v1/artifacts/{kind}",
            post(handlers::upload_artifact).get(handlers::list_artifacts),
        )
        // Search
        .route("/v1/search", get(handlers::search_artifacts))
        // Sharing scopes
        .route(
            "/v1/share",
            get(handlers::get_scope).post(handlers::update_scope),
        )
        // Quota administration
        .route(
            "/v1/quota",
            get(handlers::get_quota).post(handlers::set_quota),
        );

    let mut router = Router::new().merge(api_routes);

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Middleware layers are applied in reverse order (outermost first).
    // Order of execution: TraceLayer -> Auth -> body limit -> Handler
    router
        .layer(DefaultBodyLimit::max(state.config.server.max_body_limit()))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
