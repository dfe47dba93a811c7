//! Repository traits for metadata operations.

pub mod artifacts;
pub mod quotas;
pub mod scopes;
pub mod search;
pub mod tokens;

pub use artifacts::ArtifactRepo;
pub use quotas::QuotaRepo;
pub use scopes::ScopeRepo;
pub use search::{SearchHit, SearchRepo};
pub use tokens::TokenRepo;
