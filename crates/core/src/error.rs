//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("unknown artifact kind: {0}")]
    InvalidArtifactKind(String),

    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
