//! Migration translation.
//!
//! Writes to the system DDL relation carry captured DDL statements; writes
//! to the system migrations relation mark a version boundary. A transaction
//! touching either is migration-bearing. Supported statements are turned into
//! [`MigrationOp`]s, the rest are dropped and reported.

pub mod type_map;
mod ddl;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use model::{Change, ColumnSchema, ForeignKey, Record, Schema};

use crate::config::CodecConfig;
use crate::error::CodecError;
use crate::opcodes::{STMT_ALTER_ADD_COLUMN, STMT_CREATE_INDEX, STMT_CREATE_TABLE};
use crate::version_store::VersionStore;

use ddl::{translate_query, SchemaChange, TranslatedStatement, Translation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    CreateTable,
    AlterAddColumn,
    CreateIndex,
}

impl StatementKind {
    pub fn code(self) -> u8 {
        match self {
            StatementKind::CreateTable => STMT_CREATE_TABLE,
            StatementKind::AlterAddColumn => STMT_ALTER_ADD_COLUMN,
            StatementKind::CreateIndex => STMT_CREATE_INDEX,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            STMT_CREATE_TABLE => Some(StatementKind::CreateTable),
            STMT_ALTER_ADD_COLUMN => Some(StatementKind::AlterAddColumn),
            STMT_CREATE_INDEX => Some(StatementKind::CreateIndex),
            _ => None,
        }
    }
}

/// A statement re-emitted in the replica dialect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatement {
    pub kind: StatementKind,
    pub sql: String,
}

/// Portable description of the schema effect of one DDL record on one table.
///
/// `columns`, `primary_key_columns` and `foreign_keys` describe the table as
/// it stands after the statements, so receivers can apply either the
/// structured form or replay `statements`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOp {
    pub version: String,
    pub table_name: String,
    pub columns: Vec<ColumnSchema>,
    pub primary_key_columns: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub statements: Vec<MigrationStatement>,
}

/// Outcome of one migration-bearing transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    /// Version persisted for this transaction, if it carried a boundary record
    pub version: Option<String>,
    pub dropped_statements: Vec<String>,
    pub saved: bool,
}

/// Recognizes system migration records and translates them.
pub struct MigrationTranslator<V> {
    config: CodecConfig,
    store: V,
}

impl<V: VersionStore> MigrationTranslator<V> {
    pub fn new(config: CodecConfig, store: V) -> Self {
        MigrationTranslator { config, store }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn store(&self) -> &V {
        &self.store
    }

    /// Whether a change writes to one of the system migration relations
    pub fn is_migration_change(&self, change: &Change) -> bool {
        let relation = change.relation();
        relation.schema == self.config.system_namespace
            && (relation.table == self.config.ddl_table || relation.table == self.config.migrations_table)
    }

    /// Start translating the migration records of one transaction
    pub fn begin(&self, origin: &str) -> MigrationSession<'_, V> {
        MigrationSession {
            translator: self,
            origin: origin.to_string(),
            schema: None,
            pending_version: None,
            dropped: Vec::new(),
        }
    }
}

/// Per-transaction translation state.
///
/// The persisted schema is loaded on the first record that needs it and
/// accumulates every structural change; [`finish`](Self::finish) saves it
/// once if a version boundary was seen.
pub struct MigrationSession<'a, V> {
    translator: &'a MigrationTranslator<V>,
    origin: String,
    schema: Option<Schema>,
    pending_version: Option<String>,
    dropped: Vec<String>,
}

impl<'a, V: VersionStore> MigrationSession<'a, V> {
    /// Translate one migration-bearing change into zero or more operations,
    /// in statement order.
    pub async fn observe(&mut self, change: &Change) -> Result<Vec<MigrationOp>, CodecError> {
        let translator = self.translator;
        let config = &translator.config;
        let relation = change.relation();

        let record = match change {
            Change::Insert { record, .. } => record,
            other => {
                debug!("Ignoring {} on system relation {}", other.kind_name(), relation);
                return Ok(Vec::new());
            }
        };

        if relation.table == config.migrations_table {
            let version = text_column(record, "version")?
                .ok_or_else(|| CodecError::InvalidMigrationRecord("boundary record without version".to_string()))?;
            debug!("Migration boundary for {} at version {}", self.origin, version);
            self.load_schema().await?;
            self.pending_version = Some(version);
            return Ok(Vec::new());
        }

        let query = text_column(record, "query")?
            .ok_or_else(|| CodecError::InvalidMigrationRecord("DDL record without query".to_string()))?;
        let version = text_column(record, "version")?.unwrap_or_default();

        let mut ops: Vec<MigrationOp> = Vec::new();
        for translation in translate_query(&query) {
            match translation {
                Translation::Supported(statement) => {
                    let op = self.apply_statement(&version, statement).await?;
                    match ops.last_mut() {
                        Some(last) if last.table_name == op.table_name => {
                            last.statements.extend(op.statements);
                            last.columns = op.columns;
                            last.primary_key_columns = op.primary_key_columns;
                            last.foreign_keys = op.foreign_keys;
                        }
                        _ => ops.push(op),
                    }
                }
                Translation::Dropped(sql) => {
                    warn!("Dropping DDL with no replica equivalent: {}", sql);
                    self.dropped.push(sql);
                }
            }
        }

        Ok(ops)
    }

    /// Persist the accumulated schema if the transaction crossed a version
    /// boundary. Exactly one save happens per session.
    pub async fn finish(self) -> Result<MigrationSummary, CodecError> {
        let Some(version) = self.pending_version else {
            if self.schema.is_some() {
                debug!("Migration records for {} without a version boundary, nothing saved", self.origin);
            }
            return Ok(MigrationSummary {
                version: None,
                dropped_statements: self.dropped,
                saved: false,
            });
        };

        let mut schema = self.schema.unwrap_or_default();
        schema.version = Some(version.clone());
        self.translator.store.save_schema(&self.origin, &version, &schema).await?;
        info!(
            "Saved schema version {} for {} ({} tables)",
            version,
            self.origin,
            schema.tables.len()
        );

        Ok(MigrationSummary {
            version: Some(version),
            dropped_statements: self.dropped,
            saved: true,
        })
    }

    async fn load_schema(&mut self) -> Result<&mut Schema, CodecError> {
        if self.schema.is_none() {
            let loaded = self.translator.store.load_schema(&self.origin).await?;
            debug!(
                "Loaded schema for {} (version {:?})",
                self.origin,
                loaded.as_ref().and_then(|s| s.version.as_deref())
            );
            self.schema = Some(loaded.unwrap_or_default());
        }
        Ok(self.schema.get_or_insert_with(Schema::new))
    }

    async fn apply_statement(&mut self, version: &str, statement: TranslatedStatement) -> Result<MigrationOp, CodecError> {
        let schema = self.load_schema().await?;

        let (table_name, fallback) = match statement.change {
            SchemaChange::CreateTable(table) => {
                let name = table.name.clone();
                schema.upsert_table(table);
                (name, Vec::new())
            }
            SchemaChange::AddColumn {
                table,
                column,
                foreign_key,
            } => {
                if !schema.add_column(&table, column.clone()) {
                    warn!("Column {} added to table {} unknown to the saved schema", column.name, table);
                }
                if let Some(fk) = foreign_key {
                    schema.add_foreign_key(&table, fk);
                }
                (table, vec![column])
            }
            SchemaChange::CreateIndex { table } => (table, Vec::new()),
        };

        let mut op = MigrationOp {
            version: version.to_string(),
            table_name: table_name.clone(),
            columns: fallback,
            primary_key_columns: Vec::new(),
            foreign_keys: Vec::new(),
            statements: vec![MigrationStatement {
                kind: statement.kind,
                sql: statement.sql,
            }],
        };
        if let Some(table) = schema.table(&table_name) {
            op.columns = table.columns.clone();
            op.primary_key_columns = table.primary_key.clone();
            op.foreign_keys = table.foreign_keys.clone();
        }

        Ok(op)
    }
}

fn text_column(record: &Record, column: &str) -> Result<Option<String>, CodecError> {
    match record.get(column) {
        Some(Some(bytes)) => String::from_utf8(bytes.clone())
            .map(Some)
            .map_err(|_| CodecError::InvalidMigrationRecord(format!("column {} is not UTF-8", column))),
        _ => Ok(None),
    }
}
