use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::debug;
use thiserror::Error;

use crate::schema::Schema;
use crate::types::Relation;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown relation {0}")]
    UnknownRelation(Relation),
}

/// Maps relations to their column layout.
pub trait SchemaRegistry: Send + Sync {
    /// Ordered column names; fixes positional meaning on the wire
    fn lookup_columns(&self, relation: &Relation) -> Result<Vec<String>, RegistryError>;

    /// Ordered primary key columns
    fn lookup_primary_key(&self, relation: &Relation) -> Result<Vec<String>, RegistryError>;
}

impl<T: SchemaRegistry + ?Sized> SchemaRegistry for Arc<T> {
    fn lookup_columns(&self, relation: &Relation) -> Result<Vec<String>, RegistryError> {
        (**self).lookup_columns(relation)
    }

    fn lookup_primary_key(&self, relation: &Relation) -> Result<Vec<String>, RegistryError> {
        (**self).lookup_primary_key(relation)
    }
}

#[derive(Debug, Clone)]
struct RegisteredTable {
    columns: Vec<String>,
    primary_key: Vec<String>,
}

/// In-process registry backed by a lock-protected map.
#[derive(Debug, Default)]
pub struct MemorySchemaRegistry {
    tables: RwLock<HashMap<Relation, RegisteredTable>>,
}

impl MemorySchemaRegistry {
    pub fn new() -> Self {
        MemorySchemaRegistry::default()
    }

    pub fn register(&self, relation: Relation, columns: &[&str], primary_key: &[&str]) {
        let table = RegisteredTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
        };
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.insert(relation, table);
    }

    /// Register every table of a schema under `namespace`, replacing older
    /// layouts of the same tables.
    pub fn register_schema(&self, namespace: &str, schema: &Schema) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        for table in schema.tables.values() {
            tables.insert(
                Relation::new(namespace, &table.name),
                RegisteredTable {
                    columns: table.column_names(),
                    primary_key: table.primary_key.clone(),
                },
            );
        }
        debug!(
            "Registered {} tables in namespace {} (schema version {:?})",
            schema.tables.len(),
            namespace,
            schema.version
        );
    }

    pub fn len(&self) -> usize {
        self.tables.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_table<T>(&self, relation: &Relation, f: impl FnOnce(&RegisteredTable) -> T) -> Result<T, RegistryError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables
            .get(relation)
            .map(f)
            .ok_or_else(|| RegistryError::UnknownRelation(relation.clone()))
    }
}

impl SchemaRegistry for MemorySchemaRegistry {
    fn lookup_columns(&self, relation: &Relation) -> Result<Vec<String>, RegistryError> {
        self.with_table(relation, |t| t.columns.clone())
    }

    fn lookup_primary_key(&self, relation: &Relation) -> Result<Vec<String>, RegistryError> {
        self.with_table(relation, |t| t.primary_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, TableSchema};

    #[test]
    fn test_register_and_lookup() {
        let registry = MemorySchemaRegistry::new();
        let relation = Relation::new("public", "items");
        registry.register(relation.clone(), &["id", "value"], &["id"]);

        assert_eq!(registry.lookup_columns(&relation).unwrap(), vec!["id", "value"]);
        assert_eq!(registry.lookup_primary_key(&relation).unwrap(), vec!["id"]);
    }

    #[test]
    fn test_unknown_relation() {
        let registry = MemorySchemaRegistry::new();
        let relation = Relation::new("public", "missing");
        assert_eq!(
            registry.lookup_columns(&relation),
            Err(RegistryError::UnknownRelation(relation))
        );
    }

    #[test]
    fn test_register_schema() {
        let mut schema = Schema::new();
        schema.upsert_table(TableSchema {
            name: "parent".to_string(),
            columns: vec![ColumnSchema {
                name: "id".to_string(),
                target_type: "BLOB".to_string(),
            }],
            primary_key: vec!["id".to_string()],
            foreign_keys: Vec::new(),
        });

        let registry = Arc::new(MemorySchemaRegistry::new());
        registry.register_schema("main", &schema);

        assert_eq!(registry.len(), 1);
        let relation = Relation::new("main", "parent");
        assert_eq!(registry.lookup_primary_key(&relation).unwrap(), vec!["id"]);
    }
}
