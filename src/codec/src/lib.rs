// Core modules
pub mod config;
pub mod error;
pub mod row;
pub mod migration;
pub mod serializer;

// Support modules
pub mod wire;
pub mod version_store;
pub mod compression;
pub mod opcodes;

// Re-export main types for convenience
pub use config::CodecConfig;
pub use error::{CodecError, VersionStoreError};
pub use row::{decode_row, encode_row, mask_len, WireRow};
pub use migration::{MigrationOp, MigrationStatement, MigrationSession, MigrationSummary, MigrationTranslator, StatementKind};
pub use serializer::{decode_transaction, DecodedTransaction, SerializedTransaction, TransactionSerializer};
pub use wire::{RowOp, WireOp, WireTransactionLog};
pub use version_store::{FileVersionStore, MemoryVersionStore, VersionStore};
