//! Causal conflict resolution: applies decoded changes to a multi-writer
//! row store so that concurrent writers converge.

pub mod error;
pub mod resolver;

pub use error::ResolveError;
pub use resolver::ConflictResolver;
