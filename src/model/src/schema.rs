//! Portable schema description shared by the migration translator, the
//! version store and the schema registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Storage type in the replica dialect (e.g. `TEXT`, `BLOB`)
    pub target_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub references_table: String,
    pub references_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// All tables known at one schema version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub version: Option<String>,
    pub tables: BTreeMap<String, TableSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Insert or replace a table definition
    pub fn upsert_table(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Append a column to an existing table. Returns false if the table is
    /// unknown or already has the column.
    pub fn add_column(&mut self, table: &str, column: ColumnSchema) -> bool {
        match self.tables.get_mut(table) {
            Some(t) if !t.has_column(&column.name) => {
                t.columns.push(column);
                true
            }
            _ => false,
        }
    }

    pub fn add_foreign_key(&mut self, table: &str, foreign_key: ForeignKey) -> bool {
        match self.tables.get_mut(table) {
            Some(t) => {
                t.foreign_keys.push(foreign_key);
                true
            }
            None => false,
        }
    }
}
