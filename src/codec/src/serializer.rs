//! Transaction serializer and decoder.
//!
//! `serialize` is a fold over the transaction's changes in source order:
//! `Begin`, one row operation per data change or the translated migration
//! operations of a system record, then `Commit`.

use log::{debug, info};

use model::{Change, LogPosition, SchemaRegistry, Transaction};

use crate::error::CodecError;
use crate::migration::{MigrationOp, MigrationSummary, MigrationTranslator};
use crate::row::{decode_row, encode_row};
use crate::version_store::VersionStore;
use crate::wire::{RowOp, WireOp, WireTransactionLog};

#[derive(Debug, Clone)]
pub struct SerializedTransaction {
    pub log: WireTransactionLog,
    /// DDL statements left off the wire for lack of a replica equivalent
    pub dropped_statements: Vec<String>,
    /// Schema version saved while serializing, if any
    pub schema_version: Option<String>,
}

pub struct TransactionSerializer<R, V> {
    registry: R,
    translator: MigrationTranslator<V>,
}

impl<R: SchemaRegistry, V: VersionStore> TransactionSerializer<R, V> {
    pub fn new(registry: R, translator: MigrationTranslator<V>) -> Self {
        TransactionSerializer { registry, translator }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn translator(&self) -> &MigrationTranslator<V> {
        &self.translator
    }

    /// Build the wire log for a transaction
    pub async fn serialize(&self, txn: &Transaction) -> Result<SerializedTransaction, CodecError> {
        let is_migration = txn.changes.iter().any(|c| self.translator.is_migration_change(c));

        let mut log = WireTransactionLog::new();
        log.push(WireOp::Begin {
            is_migration,
            origin: txn.origin.clone(),
            commit_timestamp: txn.commit_timestamp,
            log_position: txn.log_position.clone(),
        });

        let mut session = if is_migration {
            Some(self.translator.begin(&txn.origin))
        } else {
            None
        };

        for change in &txn.changes {
            match session.as_mut() {
                Some(session) if self.translator.is_migration_change(change) => {
                    for op in session.observe(change).await? {
                        log.push(WireOp::Migration(op));
                    }
                }
                _ => log.push(WireOp::Row(self.encode_change(change)?)),
            }
        }

        log.push(WireOp::Commit {
            commit_timestamp: txn.commit_timestamp,
            log_position: txn.log_position.clone(),
        });

        let summary = match session {
            Some(session) => {
                let summary = session.finish().await?;
                info!(
                    "Migration transaction from {} at {}: {} operations, {} dropped statements",
                    txn.origin,
                    txn.log_position,
                    log.migrations().count(),
                    summary.dropped_statements.len()
                );
                summary
            }
            None => MigrationSummary::default(),
        };

        debug!("Serialized {} changes from {} into {} operations", txn.changes.len(), txn.origin, log.len());

        Ok(SerializedTransaction {
            log,
            dropped_statements: summary.dropped_statements,
            schema_version: summary.version,
        })
    }

    fn encode_change(&self, change: &Change) -> Result<RowOp, CodecError> {
        let relation = change.relation();
        if let Change::TruncateRelation { relation } = change {
            return Ok(RowOp::Truncate {
                relation: relation.clone(),
            });
        }

        let columns = self.registry.lookup_columns(relation)?;
        let op = match change {
            Change::Insert { relation, record, tags } => RowOp::Insert {
                relation: relation.clone(),
                row: encode_row(record, &columns),
                tags: tags.clone(),
            },
            Change::Update {
                relation,
                old_record,
                record,
                tags,
            } => RowOp::Update {
                relation: relation.clone(),
                row: encode_row(record, &columns),
                old_row: old_record.as_ref().map(|old| encode_row(old, &columns)),
                tags: tags.clone(),
            },
            Change::Delete {
                relation,
                old_record,
                tags,
            } => RowOp::Delete {
                relation: relation.clone(),
                old_row: encode_row(old_record, &columns),
                tags: tags.clone(),
            },
            Change::TruncateRelation { relation } => RowOp::Truncate {
                relation: relation.clone(),
            },
        };
        Ok(op)
    }
}

/// A wire log turned back into changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub origin: String,
    pub commit_timestamp: u64,
    pub log_position: LogPosition,
    pub is_migration: bool,
    pub changes: Vec<Change>,
    pub migrations: Vec<MigrationOp>,
}

impl DecodedTransaction {
    /// Transaction carrying the decoded data changes, ready for the resolver
    pub fn into_transaction(self) -> Transaction {
        Transaction::new(&self.origin, self.commit_timestamp, self.log_position, self.changes)
    }
}

/// Decode a wire log using the receiver's column order for each relation.
///
/// The log must hold exactly one leading `Begin` and one trailing `Commit`
/// with the same log position.
pub fn decode_transaction<R: SchemaRegistry>(
    log: &WireTransactionLog,
    registry: &R,
) -> Result<DecodedTransaction, CodecError> {
    let (first, rest) = log
        .ops
        .split_first()
        .ok_or_else(|| CodecError::InvalidFrame("empty transaction log".to_string()))?;
    let (last, body) = rest
        .split_last()
        .ok_or_else(|| CodecError::InvalidFrame("transaction log without commit".to_string()))?;

    let WireOp::Begin {
        is_migration,
        origin,
        commit_timestamp,
        log_position,
    } = first
    else {
        return Err(CodecError::InvalidFrame("transaction log must start with begin".to_string()));
    };
    let WireOp::Commit {
        log_position: commit_position,
        ..
    } = last
    else {
        return Err(CodecError::InvalidFrame("transaction log must end with commit".to_string()));
    };
    if commit_position != log_position {
        return Err(CodecError::InvalidFrame(format!(
            "begin position {} does not match commit position {}",
            log_position, commit_position
        )));
    }

    let mut changes = Vec::new();
    let mut migrations = Vec::new();
    for op in body {
        match op {
            WireOp::Row(row_op) => changes.push(decode_row_op(row_op, registry)?),
            WireOp::Migration(migration) => migrations.push(migration.clone()),
            WireOp::Begin { .. } | WireOp::Commit { .. } => {
                return Err(CodecError::InvalidFrame("nested begin or commit".to_string()));
            }
        }
    }

    Ok(DecodedTransaction {
        origin: origin.clone(),
        commit_timestamp: *commit_timestamp,
        log_position: log_position.clone(),
        is_migration: *is_migration,
        changes,
        migrations,
    })
}

fn decode_row_op<R: SchemaRegistry>(op: &RowOp, registry: &R) -> Result<Change, CodecError> {
    if let RowOp::Truncate { relation } = op {
        return Ok(Change::TruncateRelation {
            relation: relation.clone(),
        });
    }

    let columns = registry.lookup_columns(op.relation())?;
    let change = match op {
        RowOp::Insert { relation, row, tags } => Change::Insert {
            relation: relation.clone(),
            record: decode_row(&columns, row)?,
            tags: tags.clone(),
        },
        RowOp::Update {
            relation,
            row,
            old_row,
            tags,
        } => Change::Update {
            relation: relation.clone(),
            old_record: old_row.as_ref().map(|old| decode_row(&columns, old)).transpose()?,
            record: decode_row(&columns, row)?,
            tags: tags.clone(),
        },
        RowOp::Delete {
            relation,
            old_row,
            tags,
        } => Change::Delete {
            relation: relation.clone(),
            old_record: decode_row(&columns, old_row)?,
            tags: tags.clone(),
        },
        RowOp::Truncate { relation } => Change::TruncateRelation {
            relation: relation.clone(),
        },
    };
    Ok(change)
}
