use std::io::{self, Cursor, Read, Write};

use byteordered::byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};

use model::{CausalTag, ColumnSchema, ForeignKey, LogPosition, Relation};

use crate::compression::{compress_if_needed, decompress};
use crate::config::CodecConfig;
use crate::error::CodecError;
use crate::migration::{MigrationOp, MigrationStatement, StatementKind};
use crate::opcodes::*;
use crate::row::WireRow;

/// Wire frame format:
/// 1. magic "CWTL" (4 bytes)
/// 2. format version (u8)
/// 3. flags (u8) - bit 0 set when the body is LZ4-compressed
/// 4. body length (u32)
/// 5. body
/// 6. CRC32 of everything above (u32)
///
/// All integers are big-endian. Strings and byte strings are prefixed with
/// their u32 length.
const FRAME_MAGIC: &[u8; 4] = b"CWTL";
const FRAME_VERSION: u8 = 1;
const HEADER_SIZE: usize = 4 + 1 + 1 + 4;
const CRC_SIZE: usize = 4;

/// Row-level operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOp {
    Insert {
        relation: Relation,
        row: WireRow,
        tags: Vec<CausalTag>,
    },
    Update {
        relation: Relation,
        row: WireRow,
        old_row: Option<WireRow>,
        tags: Vec<CausalTag>,
    },
    Delete {
        relation: Relation,
        old_row: WireRow,
        tags: Vec<CausalTag>,
    },
    Truncate {
        relation: Relation,
    },
}

impl RowOp {
    pub fn relation(&self) -> &Relation {
        match self {
            RowOp::Insert { relation, .. }
            | RowOp::Update { relation, .. }
            | RowOp::Delete { relation, .. }
            | RowOp::Truncate { relation } => relation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOp {
    Begin {
        is_migration: bool,
        origin: String,
        commit_timestamp: u64,
        log_position: LogPosition,
    },
    Row(RowOp),
    Migration(MigrationOp),
    Commit {
        commit_timestamp: u64,
        log_position: LogPosition,
    },
}

/// Ordered operations of one transaction: `Begin`, zero or more row or
/// migration operations, `Commit`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireTransactionLog {
    pub ops: Vec<WireOp>,
}

impl WireTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WireOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The `is_migration` flag of the leading `Begin`
    pub fn is_migration(&self) -> bool {
        matches!(self.ops.first(), Some(WireOp::Begin { is_migration: true, .. }))
    }

    pub fn migrations(&self) -> impl Iterator<Item = &MigrationOp> {
        self.ops.iter().filter_map(|op| match op {
            WireOp::Migration(m) => Some(m),
            _ => None,
        })
    }

    pub fn row_ops(&self) -> impl Iterator<Item = &RowOp> {
        self.ops.iter().filter_map(|op| match op {
            WireOp::Row(r) => Some(r),
            _ => None,
        })
    }

    /// Encode the log into a single checksummed frame
    pub fn encode(&self, config: &CodecConfig) -> Result<Vec<u8>, CodecError> {
        let mut body = Vec::with_capacity(256);
        write_len(&mut body, self.ops.len())?;
        for op in &self.ops {
            write_op(&mut body, op)?;
        }

        let (flags, body) = match compress_if_needed(&body, config.compression_threshold) {
            Some(compressed) => {
                debug!("Compressed transaction body {} -> {} bytes", body.len(), compressed.len());
                (FLAG_COMPRESSED, compressed)
            }
            None => (0, body),
        };

        let total = (HEADER_SIZE + body.len() + CRC_SIZE) as u64;
        if total > config.max_message_size {
            return Err(CodecError::MessageTooLarge {
                size: total,
                max: config.max_message_size,
            });
        }

        let mut frame = Vec::with_capacity(total as usize);
        frame.write_all(FRAME_MAGIC)?;
        frame.write_u8(FRAME_VERSION)?;
        frame.write_u8(flags)?;
        frame.write_u32::<BigEndian>(body_len_field(body.len())?)?;
        frame.write_all(&body)?;

        let crc = crc32fast::hash(&frame);
        frame.write_u32::<BigEndian>(crc)?;
        Ok(frame)
    }

    /// Decode a frame produced by [`encode`](Self::encode)
    pub fn decode(data: &[u8], config: &CodecConfig) -> Result<Self, CodecError> {
        if data.len() < HEADER_SIZE + CRC_SIZE {
            return Err(CodecError::InvalidFrame(format!("frame too short: {} bytes", data.len())));
        }
        if &data[0..4] != FRAME_MAGIC {
            return Err(CodecError::InvalidFrame("invalid magic".to_string()));
        }

        let mut header = Cursor::new(&data[4..HEADER_SIZE]);
        let version = header.read_u8()?;
        if version != FRAME_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let flags = header.read_u8()?;
        let body_len = header.read_u32::<BigEndian>()? as usize;

        let total = HEADER_SIZE + body_len + CRC_SIZE;
        if total as u64 > config.max_message_size {
            return Err(CodecError::MessageTooLarge {
                size: total as u64,
                max: config.max_message_size,
            });
        }
        if data.len() < total {
            return Err(CodecError::InvalidFrame(format!(
                "frame truncated: expected {} bytes, got {}",
                total,
                data.len()
            )));
        }

        let stored = Cursor::new(&data[total - CRC_SIZE..total]).read_u32::<BigEndian>()?;
        let calculated = crc32fast::hash(&data[..total - CRC_SIZE]);
        if stored != calculated {
            warn!("Rejecting corrupt transaction frame ({} bytes)", total);
            return Err(CodecError::Checksum { stored, calculated });
        }

        let raw_body = &data[HEADER_SIZE..HEADER_SIZE + body_len];
        let body = if flags & FLAG_COMPRESSED != 0 {
            // The LZ4 block carries its decompressed size as a little-endian
            // u32 prefix; check it before allocating
            if raw_body.len() < 4 {
                return Err(CodecError::InvalidFrame("compressed body too short".to_string()));
            }
            let size = Cursor::new(&raw_body[..4]).read_u32::<LittleEndian>()? as u64;
            if size > config.max_message_size {
                return Err(CodecError::MessageTooLarge {
                    size,
                    max: config.max_message_size,
                });
            }
            decompress(raw_body)?
        } else {
            raw_body.to_vec()
        };

        let mut cursor = Cursor::new(body.as_slice());
        let count = cursor.read_u32::<BigEndian>()? as usize;
        let mut ops = Vec::with_capacity(count.min(body.len()));
        for _ in 0..count {
            ops.push(read_op(&mut cursor)?);
        }
        if (cursor.position() as usize) != body.len() {
            return Err(CodecError::InvalidFrame(format!(
                "{} trailing bytes after last operation",
                body.len() - cursor.position() as usize
            )));
        }

        Ok(WireTransactionLog { ops })
    }
}

fn write_op<W: Write>(w: &mut W, op: &WireOp) -> io::Result<()> {
    match op {
        WireOp::Begin {
            is_migration,
            origin,
            commit_timestamp,
            log_position,
        } => {
            w.write_u8(OP_BEGIN)?;
            w.write_u8(if *is_migration { BEGIN_MIGRATION } else { 0 })?;
            write_str(w, origin)?;
            w.write_u64::<BigEndian>(*commit_timestamp)?;
            write_bytes(w, log_position.as_bytes())
        }
        WireOp::Commit {
            commit_timestamp,
            log_position,
        } => {
            w.write_u8(OP_COMMIT)?;
            w.write_u64::<BigEndian>(*commit_timestamp)?;
            write_bytes(w, log_position.as_bytes())
        }
        WireOp::Row(RowOp::Insert { relation, row, tags }) => {
            w.write_u8(OP_INSERT)?;
            write_relation(w, relation)?;
            write_tags(w, tags)?;
            write_row(w, row)
        }
        WireOp::Row(RowOp::Update {
            relation,
            row,
            old_row,
            tags,
        }) => {
            w.write_u8(OP_UPDATE)?;
            write_relation(w, relation)?;
            write_tags(w, tags)?;
            write_row(w, row)?;
            match old_row {
                Some(old) => {
                    w.write_u8(1)?;
                    write_row(w, old)
                }
                None => w.write_u8(0),
            }
        }
        WireOp::Row(RowOp::Delete { relation, old_row, tags }) => {
            w.write_u8(OP_DELETE)?;
            write_relation(w, relation)?;
            write_tags(w, tags)?;
            write_row(w, old_row)
        }
        WireOp::Row(RowOp::Truncate { relation }) => {
            w.write_u8(OP_TRUNCATE)?;
            write_relation(w, relation)
        }
        WireOp::Migration(migration) => {
            w.write_u8(OP_MIGRATE)?;
            write_migration(w, migration)
        }
    }
}

fn read_op(r: &mut Cursor<&[u8]>) -> Result<WireOp, CodecError> {
    let op = r.read_u8()?;
    let op = match op {
        OP_BEGIN => {
            let flags = r.read_u8()?;
            WireOp::Begin {
                is_migration: flags & BEGIN_MIGRATION != 0,
                origin: read_str(r)?,
                commit_timestamp: r.read_u64::<BigEndian>()?,
                log_position: LogPosition(read_bytes(r)?),
            }
        }
        OP_COMMIT => WireOp::Commit {
            commit_timestamp: r.read_u64::<BigEndian>()?,
            log_position: LogPosition(read_bytes(r)?),
        },
        OP_INSERT => WireOp::Row(RowOp::Insert {
            relation: read_relation(r)?,
            tags: read_tags(r)?,
            row: read_row(r)?,
        }),
        OP_UPDATE => {
            let relation = read_relation(r)?;
            let tags = read_tags(r)?;
            let row = read_row(r)?;
            let old_row = match r.read_u8()? {
                0 => None,
                _ => Some(read_row(r)?),
            };
            WireOp::Row(RowOp::Update {
                relation,
                row,
                old_row,
                tags,
            })
        }
        OP_DELETE => WireOp::Row(RowOp::Delete {
            relation: read_relation(r)?,
            tags: read_tags(r)?,
            old_row: read_row(r)?,
        }),
        OP_TRUNCATE => WireOp::Row(RowOp::Truncate {
            relation: read_relation(r)?,
        }),
        OP_MIGRATE => WireOp::Migration(read_migration(r)?),
        other => return Err(CodecError::InvalidFrame(format!("unknown operation: {}", other))),
    };
    Ok(op)
}

fn write_migration<W: Write>(w: &mut W, migration: &MigrationOp) -> io::Result<()> {
    write_str(w, &migration.version)?;
    write_str(w, &migration.table_name)?;

    write_len(w, migration.columns.len())?;
    for column in &migration.columns {
        write_str(w, &column.name)?;
        write_str(w, &column.target_type)?;
    }

    write_str_list(w, &migration.primary_key_columns)?;

    write_len(w, migration.foreign_keys.len())?;
    for fk in &migration.foreign_keys {
        write_str_list(w, &fk.columns)?;
        write_str(w, &fk.references_table)?;
        write_str_list(w, &fk.references_columns)?;
    }

    write_len(w, migration.statements.len())?;
    for statement in &migration.statements {
        w.write_u8(statement.kind.code())?;
        write_str(w, &statement.sql)?;
    }
    Ok(())
}

fn read_migration(r: &mut Cursor<&[u8]>) -> Result<MigrationOp, CodecError> {
    let version = read_str(r)?;
    let table_name = read_str(r)?;

    let count = read_count(r)?;
    let mut columns = Vec::with_capacity(count);
    for _ in 0..count {
        columns.push(ColumnSchema {
            name: read_str(r)?,
            target_type: read_str(r)?,
        });
    }

    let primary_key_columns = read_str_list(r)?;

    let count = read_count(r)?;
    let mut foreign_keys = Vec::with_capacity(count);
    for _ in 0..count {
        foreign_keys.push(ForeignKey {
            columns: read_str_list(r)?,
            references_table: read_str(r)?,
            references_columns: read_str_list(r)?,
        });
    }

    let count = read_count(r)?;
    let mut statements = Vec::with_capacity(count);
    for _ in 0..count {
        let code = r.read_u8()?;
        let kind = StatementKind::from_code(code)
            .ok_or_else(|| CodecError::InvalidFrame(format!("unknown statement kind: {}", code)))?;
        statements.push(MigrationStatement {
            kind,
            sql: read_str(r)?,
        });
    }

    Ok(MigrationOp {
        version,
        table_name,
        columns,
        primary_key_columns,
        foreign_keys,
        statements,
    })
}

fn write_relation<W: Write>(w: &mut W, relation: &Relation) -> io::Result<()> {
    write_str(w, &relation.schema)?;
    write_str(w, &relation.table)
}

fn read_relation(r: &mut Cursor<&[u8]>) -> Result<Relation, CodecError> {
    Ok(Relation {
        schema: read_str(r)?,
        table: read_str(r)?,
    })
}

fn write_tags<W: Write>(w: &mut W, tags: &[CausalTag]) -> io::Result<()> {
    write_len(w, tags.len())?;
    for tag in tags {
        write_str(w, &tag.to_string())?;
    }
    Ok(())
}

fn read_tags(r: &mut Cursor<&[u8]>) -> Result<Vec<CausalTag>, CodecError> {
    let count = read_count(r)?;
    let mut tags = Vec::with_capacity(count);
    for _ in 0..count {
        tags.push(read_str(r)?.parse::<CausalTag>()?);
    }
    Ok(tags)
}

fn write_row<W: Write>(w: &mut W, row: &WireRow) -> io::Result<()> {
    write_bytes(w, &row.null_mask)?;
    write_len(w, row.values.len())?;
    for value in &row.values {
        write_bytes(w, value)?;
    }
    Ok(())
}

fn read_row(r: &mut Cursor<&[u8]>) -> Result<WireRow, CodecError> {
    let null_mask = read_bytes(r)?;
    let count = read_count(r)?;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(read_bytes(r)?);
    }
    Ok(WireRow { null_mask, values })
}

fn write_str_list<W: Write>(w: &mut W, items: &[String]) -> io::Result<()> {
    write_len(w, items.len())?;
    for item in items {
        write_str(w, item)?;
    }
    Ok(())
}

fn read_str_list(r: &mut Cursor<&[u8]>) -> Result<Vec<String>, CodecError> {
    let count = read_count(r)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(read_str(r)?);
    }
    Ok(items)
}

fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_bytes(w, s.as_bytes())
}

fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_len(w, bytes.len())?;
    w.write_all(bytes)
}

/// u32 length prefix; lengths that do not fit are rejected
fn write_len<W: Write>(w: &mut W, len: usize) -> io::Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("length {} exceeds u32", len)))?;
    w.write_u32::<BigEndian>(len)
}

fn body_len_field(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::MessageTooLarge {
        size: len as u64,
        max: u64::from(u32::MAX),
    })
}

fn remaining(r: &Cursor<&[u8]>) -> usize {
    r.get_ref().len().saturating_sub(r.position() as usize)
}

/// Element count. Every element takes at least one byte, so a count above
/// the remaining length is corrupt.
fn read_count(r: &mut Cursor<&[u8]>) -> Result<usize, CodecError> {
    let count = r.read_u32::<BigEndian>()? as usize;
    if count > remaining(r) {
        return Err(CodecError::InvalidFrame(format!(
            "{} elements declared with {} bytes left",
            count,
            remaining(r)
        )));
    }
    Ok(count)
}

fn read_bytes(r: &mut Cursor<&[u8]>) -> Result<Vec<u8>, CodecError> {
    let len = r.read_u32::<BigEndian>()? as usize;
    if len > remaining(r) {
        return Err(CodecError::InvalidFrame(format!(
            "field of {} bytes exceeds remaining {} bytes",
            len,
            remaining(r)
        )));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_str(r: &mut Cursor<&[u8]>) -> Result<String, CodecError> {
    String::from_utf8(read_bytes(r)?).map_err(|e| CodecError::InvalidFrame(format!("invalid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> WireTransactionLog {
        let relation = Relation::new("public", "items");
        WireTransactionLog {
            ops: vec![
                WireOp::Begin {
                    is_migration: false,
                    origin: "node-a".to_string(),
                    commit_timestamp: 1700000000000,
                    log_position: LogPosition::from_u64(99),
                },
                WireOp::Row(RowOp::Insert {
                    relation: relation.clone(),
                    row: WireRow {
                        null_mask: vec![0b0100_0000],
                        values: vec![b"1".to_vec(), Vec::new()],
                    },
                    tags: Vec::new(),
                }),
                WireOp::Row(RowOp::Update {
                    relation: relation.clone(),
                    row: WireRow {
                        null_mask: vec![0],
                        values: vec![b"1".to_vec(), b"x".to_vec()],
                    },
                    old_row: None,
                    tags: vec![CausalTag::new("node-b", 5)],
                }),
                WireOp::Row(RowOp::Truncate { relation }),
                WireOp::Migration(MigrationOp {
                    version: "3".to_string(),
                    table_name: "t".to_string(),
                    columns: vec![ColumnSchema {
                        name: "id".to_string(),
                        target_type: "BLOB".to_string(),
                    }],
                    primary_key_columns: vec!["id".to_string()],
                    foreign_keys: vec![ForeignKey {
                        columns: vec!["id".to_string()],
                        references_table: "p".to_string(),
                        references_columns: vec!["id".to_string()],
                    }],
                    statements: vec![MigrationStatement {
                        kind: StatementKind::CreateTable,
                        sql: "CREATE TABLE \"t\" (\"id\" BLOB NOT NULL, PRIMARY KEY (\"id\")) WITHOUT ROWID;"
                            .to_string(),
                    }],
                }),
                WireOp::Commit {
                    commit_timestamp: 1700000000000,
                    log_position: LogPosition::from_u64(99),
                },
            ],
        }
    }

    #[test]
    fn test_encode_decode() {
        let config = CodecConfig::default();
        let log = sample_log();
        let frame = log.encode(&config).unwrap();

        assert_eq!(&frame[0..4], FRAME_MAGIC);
        assert_eq!(WireTransactionLog::decode(&frame, &config).unwrap(), log);
    }

    #[test]
    fn test_corrupted_frame_detected() {
        let config = CodecConfig::default();
        let mut frame = sample_log().encode(&config).unwrap();
        let middle = frame.len() / 2;
        frame[middle] ^= 0xFF;

        assert!(matches!(
            WireTransactionLog::decode(&frame, &config),
            Err(CodecError::Checksum { .. })
        ));
    }

    #[test]
    fn test_truncated_frame() {
        let config = CodecConfig::default();
        let frame = sample_log().encode(&config).unwrap();

        assert!(matches!(
            WireTransactionLog::decode(&frame[..frame.len() - 1], &config),
            Err(CodecError::InvalidFrame(_))
        ));
        assert!(matches!(
            WireTransactionLog::decode(&frame[..6], &config),
            Err(CodecError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let config = CodecConfig::default();
        let mut frame = sample_log().encode(&config).unwrap();
        frame[4] = 9;
        assert!(matches!(
            WireTransactionLog::decode(&frame, &config),
            Err(CodecError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_large_body_is_compressed() {
        let config = CodecConfig::default().with_compression_threshold(64);
        let relation = Relation::new("public", "docs");
        let mut log = WireTransactionLog::new();
        for _ in 0..50 {
            log.push(WireOp::Row(RowOp::Insert {
                relation: relation.clone(),
                row: WireRow {
                    null_mask: vec![0],
                    values: vec![b"the same document body".to_vec()],
                },
                tags: Vec::new(),
            }));
        }

        let frame = log.encode(&config).unwrap();
        assert_eq!(frame[5] & FLAG_COMPRESSED, FLAG_COMPRESSED);
        assert_eq!(WireTransactionLog::decode(&frame, &config).unwrap(), log);
    }

    #[test]
    fn test_message_size_cap() {
        let log = sample_log();
        let frame = log.encode(&CodecConfig::default()).unwrap();
        let small = CodecConfig::default().with_max_message_size(16);

        assert!(matches!(log.encode(&small), Err(CodecError::MessageTooLarge { .. })));
        assert!(matches!(
            WireTransactionLog::decode(&frame, &small),
            Err(CodecError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_accessors() {
        let log = sample_log();
        assert!(!log.is_migration());
        assert_eq!(log.migrations().count(), 1);
        assert_eq!(log.row_ops().count(), 3);
        assert_eq!(log.row_ops().last().unwrap().relation().table, "items");
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_lengths_beyond_u32_are_rejected() {
        let too_long = u32::MAX as usize + 1;

        assert_eq!(body_len_field(u32::MAX as usize).unwrap(), u32::MAX);
        assert!(matches!(
            body_len_field(too_long),
            Err(CodecError::MessageTooLarge { size, max }) if size == too_long as u64 && max == u64::from(u32::MAX)
        ));

        let mut sink = Vec::new();
        let err = write_len(&mut sink, too_long).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(sink.is_empty());
    }
}
