//! Prometheus metrics for the depot server.
//!
//! Metrics are aggregate only: no owners, hashes or names appear in labels.
//! The `/metrics` endpoint is unauthenticated and should be network-restricted
//! to the scraper at the infrastructure level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload metrics
pub static UPLOADS_COMMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_uploads_committed_total",
        "Total number of uploads committed",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_DEDUPLICATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_uploads_deduplicated_total",
        "Total number of uploads whose content was already stored",
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_bytes_uploaded_total",
        "Total bytes received in committed uploads",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "depot_uploads_rejected_total",
            "Total rejected uploads by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "depot_upload_duration_seconds",
            "Time from admission to commit of an upload",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 120.0]),
    )
    .expect("metric creation failed")
});

// Read and delete metrics
pub static DOWNLOADS_SERVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_downloads_served_total",
        "Total number of artifact downloads started",
    )
    .expect("metric creation failed")
});

pub static ARTIFACTS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_artifacts_deleted_total",
        "Total number of artifacts deleted",
    )
    .expect("metric creation failed")
});

// Quota metrics
pub static QUOTA_RESERVATIONS_LEAKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_quota_reservations_dropped_total",
        "Total quota reservations dropped without being redeemed or released",
    )
    .expect("metric creation failed")
});

// Reconciliation metrics
pub static RECONCILE_OBJECTS_REMOVED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "depot_reconcile_objects_removed_total",
            "Objects removed by the reconciliation sweep by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests and embedded routers can call it freely.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOADS_COMMITTED.clone()),
            Box::new(UPLOADS_DEDUPLICATED.clone()),
            Box::new(BYTES_UPLOADED.clone()),
            Box::new(UPLOADS_REJECTED.clone()),
            Box::new(UPLOAD_DURATION.clone()),
            Box::new(DOWNLOADS_SERVED.clone()),
            Box::new(ARTIFACTS_DELETED.clone()),
            Box::new(QUOTA_RESERVATIONS_LEAKED.clone()),
            Box::new(RECONCILE_OBJECTS_REMOVED.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// Handler for the /metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record rejected uploads by reason.
pub fn record_upload_rejection(reason: &str) {
    UPLOADS_REJECTED.with_label_values(&[reason]).inc();
}
