use model::{RegistryError, Relation};
use store::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("{relation}: primary key column {column} missing or null")]
    MissingKeyColumn { relation: Relation, column: String },

    #[error("store apply failed: {0}")]
    Store(#[from] StoreError),
}
