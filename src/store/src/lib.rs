//! Causally tracked multi-writer row store.

pub mod types;
pub mod config;
pub mod error;
pub mod backend;
pub mod crdt;
pub mod sharded;

pub use types::{Row, RowKey, RowMutation};
pub use config::StoreConfig;
pub use error::StoreError;
pub use backend::RowStore;
pub use crdt::{FieldRegister, LivenessSet};
pub use sharded::ShardedRowStore;
