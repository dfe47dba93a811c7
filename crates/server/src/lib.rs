//! HTTP API server for the depot artifact repository.
//!
//! This crate provides the HTTP surface over the metadata and object stores:
//! - Streamed uploads with quota admission and content hashing
//! - Artifact listing, info, attributes, download and deletion
//! - Name search and latest-by-name lookup
//! - Sharing scopes and quota administration
//! - Startup reconciliation between the two stores

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod locks;
pub mod metrics;
pub mod quota;
pub mod reconcile;
pub mod routes;
pub mod state;
pub mod upload;

pub use auth::TraceId;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
