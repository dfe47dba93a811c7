//! HTTP request handlers.

pub mod artifacts;
pub mod health;
pub mod quota;
pub mod search;
pub mod share;

pub use artifacts::*;
pub use health::*;
pub use quota::*;
pub use search::*;
pub use share::*;
