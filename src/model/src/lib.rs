//! Data model shared by the transaction codec and the conflict resolver.

pub mod types;
pub mod tag;
pub mod schema;
pub mod registry;

pub use types::{AckHandle, Change, ColumnValue, LogPosition, Record, Relation, Transaction, current_timestamp_ms};
pub use tag::{CausalTag, TagParseError};
pub use schema::{ColumnSchema, ForeignKey, Schema, TableSchema};
pub use registry::{MemorySchemaRegistry, RegistryError, SchemaRegistry};
