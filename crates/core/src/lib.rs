//! Core domain types and shared logic for the depot artifact repository.
//!
//! This crate defines the data model used across all other crates:
//! - Content hashes that identify artifacts
//! - Artifact kinds, records and attribute validation
//! - Owner identities
//! - Application configuration

pub mod artifact;
pub mod config;
pub mod error;
pub mod hash;
pub mod identity;

pub use artifact::{Artifact, ArtifactKind};
pub use error::{Error, Result};
pub use hash::{ArtifactHash, ArtifactHasher};
pub use identity::Identity;

/// Storage key prefix for promoted, content-addressed objects.
pub const ARTIFACT_KEY_PREFIX: &str = "artifacts/";

/// Storage key prefix for in-flight upload objects.
pub const STAGING_KEY_PREFIX: &str = "staging/";

/// Default per-owner quota: 2 GiB.
pub const DEFAULT_QUOTA_BYTES: u64 = 2 * 1024 * 1024 * 1024;
