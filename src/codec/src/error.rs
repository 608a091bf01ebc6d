use model::{RegistryError, TagParseError};
use thiserror::Error;

/// Errors raised while encoding or decoding transactions.
///
/// Column count mismatches and unknown relations mean the registry and the
/// codec disagree about a table; they are never retried here.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("column count mismatch: {columns} columns, {values} values")]
    ColumnCountMismatch { columns: usize, values: usize },

    #[error("null bitmask too short: {bytes} bytes for {columns} columns")]
    BitmaskTooShort { columns: usize, bytes: usize },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("schema version store: {0}")]
    VersionStore(#[from] VersionStoreError),

    #[error("invalid migration record: {0}")]
    InvalidMigrationRecord(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CRC mismatch: stored={stored}, calculated={calculated}")]
    Checksum { stored: u32, calculated: u32 },

    #[error("unsupported wire format version: {0}")]
    UnsupportedVersion(u8),

    #[error("message too large: {size} bytes (max: {max} bytes)")]
    MessageTooLarge { size: u64, max: u64 },

    #[error("decompression failed: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),

    #[error(transparent)]
    InvalidTag(#[from] TagParseError),
}

/// Errors from the schema version store collaborator.
#[derive(Debug, Error)]
pub enum VersionStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
