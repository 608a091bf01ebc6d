//! DDL parsing and re-emission in the replica dialect.
//!
//! Statements are parsed with the PostgreSQL dialect. Only table creation,
//! `ALTER TABLE … ADD COLUMN` and plain column indexes have a replica
//! equivalent; everything else is reported as dropped.

use log::warn;
use sqlparser::ast::{
    AlterTableOperation, ColumnDef, ColumnOption, CreateIndex, CreateTable, Expr, Ident, ObjectName, Statement,
    TableConstraint,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use model::{ColumnSchema, ForeignKey, TableSchema};

use super::type_map::{target_type, BLOB};
use super::StatementKind;

/// Structural effect of one supported statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SchemaChange {
    CreateTable(TableSchema),
    AddColumn {
        table: String,
        column: ColumnSchema,
        foreign_key: Option<ForeignKey>,
    },
    CreateIndex {
        table: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TranslatedStatement {
    pub kind: StatementKind,
    pub change: SchemaChange,
    /// Statement re-emitted in the replica dialect
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Translation {
    Supported(TranslatedStatement),
    /// Source text of a statement with no replica equivalent
    Dropped(String),
}

struct TranslatedColumn {
    schema: ColumnSchema,
    not_null: bool,
    primary_key: bool,
    foreign_key: Option<ForeignKey>,
}

/// Translate every statement of a captured DDL query, in order.
/// A query the parser rejects is dropped as a whole.
pub(crate) fn translate_query(query: &str) -> Vec<Translation> {
    let statements = match Parser::parse_sql(&PostgreSqlDialect {}, query) {
        Ok(statements) => statements,
        Err(e) => {
            log::debug!("DDL not parseable ({}): {}", e, query.trim());
            return vec![Translation::Dropped(query.trim().to_string())];
        }
    };

    statements.iter().flat_map(translate_statement).collect()
}

fn translate_statement(statement: &Statement) -> Vec<Translation> {
    match statement {
        Statement::CreateTable(create) => vec![Translation::Supported(create_table(create))],
        Statement::AlterTable { name, operations, .. } => alter_table(name, operations, statement),
        Statement::CreateIndex(index) => match create_index(index) {
            Some(translated) => vec![Translation::Supported(translated)],
            None => vec![Translation::Dropped(statement.to_string())],
        },
        other => vec![Translation::Dropped(other.to_string())],
    }
}

fn create_table(create: &CreateTable) -> TranslatedStatement {
    let name = object_leaf(&create.name);
    let columns: Vec<TranslatedColumn> = create.columns.iter().map(translate_column).collect();

    let mut primary_key: Vec<String> = columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.schema.name.clone())
        .collect();
    let mut foreign_keys: Vec<ForeignKey> = columns.iter().filter_map(|c| c.foreign_key.clone()).collect();

    for constraint in &create.constraints {
        match constraint {
            TableConstraint::PrimaryKey { columns, .. } => {
                primary_key = columns.iter().map(ident_name).collect();
            }
            TableConstraint::ForeignKey {
                columns,
                foreign_table,
                referred_columns,
                ..
            } => foreign_keys.push(ForeignKey {
                columns: columns.iter().map(ident_name).collect(),
                references_table: object_leaf(foreign_table),
                references_columns: referred_columns.iter().map(ident_name).collect(),
            }),
            _ => {}
        }
    }

    let sql = render_create_table(&name, &columns, &primary_key, &foreign_keys);
    let table = TableSchema {
        name,
        columns: columns.into_iter().map(|c| c.schema).collect(),
        primary_key,
        foreign_keys,
    };

    TranslatedStatement {
        kind: StatementKind::CreateTable,
        change: SchemaChange::CreateTable(table),
        sql,
    }
}

fn alter_table(name: &ObjectName, operations: &[AlterTableOperation], statement: &Statement) -> Vec<Translation> {
    let table = object_leaf(name);
    let mut translations = Vec::with_capacity(operations.len());

    for operation in operations {
        let column = match operation {
            AlterTableOperation::AddColumn { column_def, .. } => translate_column(column_def),
            _ => return vec![Translation::Dropped(statement.to_string())],
        };
        // The replica cannot add key columns to an existing table
        if column.primary_key {
            return vec![Translation::Dropped(statement.to_string())];
        }

        // NOT NULL is left out: the replica rejects it on added columns
        // without a default
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote(&table),
            quote(&column.schema.name),
            column.schema.target_type
        );
        if let Some(fk) = &column.foreign_key {
            sql.push_str(&format!(
                " REFERENCES {} ({})",
                quote(&fk.references_table),
                quote_list(&fk.references_columns)
            ));
        }
        sql.push(';');

        translations.push(Translation::Supported(TranslatedStatement {
            kind: StatementKind::AlterAddColumn,
            change: SchemaChange::AddColumn {
                table: table.clone(),
                column: column.schema,
                foreign_key: column.foreign_key,
            },
            sql,
        }));
    }

    translations
}

fn create_index(index: &CreateIndex) -> Option<TranslatedStatement> {
    let table = object_leaf(&index.table_name);
    // Expression indexes have no portable form
    let columns = index
        .columns
        .iter()
        .map(|column| match &column.expr {
            Expr::Identifier(ident) => Some(ident.value.clone()),
            _ => None,
        })
        .collect::<Option<Vec<String>>>()?;

    let name = index
        .name
        .as_ref()
        .map(object_leaf)
        .unwrap_or_else(|| format!("{}_{}_idx", table, columns.join("_")));

    let sql = format!(
        "CREATE {}INDEX {} ON {} ({});",
        if index.unique { "UNIQUE " } else { "" },
        quote(&name),
        quote(&table),
        quote_list(&columns)
    );

    Some(TranslatedStatement {
        kind: StatementKind::CreateIndex,
        change: SchemaChange::CreateIndex { table },
        sql,
    })
}

fn translate_column(def: &ColumnDef) -> TranslatedColumn {
    let name = ident_name(&def.name);
    let source_type = def.data_type.to_string();
    let target = target_type(&source_type).unwrap_or_else(|| {
        warn!("No replica type for {} column {}, storing as {}", source_type, name, BLOB);
        BLOB
    });

    let mut column = TranslatedColumn {
        schema: ColumnSchema {
            name: name.clone(),
            target_type: target.to_string(),
        },
        not_null: false,
        primary_key: false,
        foreign_key: None,
    };

    for option in &def.options {
        match &option.option {
            ColumnOption::NotNull => column.not_null = true,
            ColumnOption::Unique { is_primary: true, .. } => {
                column.primary_key = true;
                column.not_null = true;
            }
            ColumnOption::ForeignKey {
                foreign_table,
                referred_columns,
                ..
            } => {
                column.foreign_key = Some(ForeignKey {
                    columns: vec![name.clone()],
                    references_table: object_leaf(foreign_table),
                    references_columns: referred_columns.iter().map(ident_name).collect(),
                });
            }
            _ => {}
        }
    }

    column
}

fn render_create_table(
    name: &str,
    columns: &[TranslatedColumn],
    primary_key: &[String],
    foreign_keys: &[ForeignKey],
) -> String {
    let mut definitions: Vec<String> = columns
        .iter()
        .map(|c| {
            let mut definition = format!("{} {}", quote(&c.schema.name), c.schema.target_type);
            if c.not_null || primary_key.contains(&c.schema.name) {
                definition.push_str(" NOT NULL");
            }
            definition
        })
        .collect();

    if !primary_key.is_empty() {
        definitions.push(format!("PRIMARY KEY ({})", quote_list(primary_key)));
    }
    for fk in foreign_keys {
        definitions.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            quote_list(&fk.columns),
            quote(&fk.references_table),
            quote_list(&fk.references_columns)
        ));
    }

    let mut sql = format!("CREATE TABLE {} ({})", quote(name), definitions.join(", "));
    if !primary_key.is_empty() {
        sql.push_str(" WITHOUT ROWID");
    }
    sql.push(';');
    sql
}

fn ident_name(ident: &Ident) -> String {
    ident.value.clone()
}

/// Unqualified name: `public.items` becomes `items`
fn object_leaf(name: &ObjectName) -> String {
    name.0.last().map(ident_name).unwrap_or_default()
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_list(names: &[String]) -> String {
    names.iter().map(|n| quote(n)).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supported(translation: &Translation) -> &TranslatedStatement {
        match translation {
            Translation::Supported(t) => t,
            Translation::Dropped(sql) => panic!("statement was dropped: {}", sql),
        }
    }

    #[test]
    fn test_create_table() {
        let translations = translate_query(
            "CREATE TABLE public.items (id UUID PRIMARY KEY, value TEXT NOT NULL, amount NUMERIC(10,2));",
        );
        assert_eq!(translations.len(), 1);
        let translated = supported(&translations[0]);

        assert_eq!(translated.kind, StatementKind::CreateTable);
        let SchemaChange::CreateTable(table) = &translated.change else {
            panic!("expected table creation");
        };
        assert_eq!(table.name, "items");
        assert_eq!(table.primary_key, vec!["id"]);
        assert_eq!(
            table.columns,
            vec![
                ColumnSchema { name: "id".to_string(), target_type: "BLOB".to_string() },
                ColumnSchema { name: "value".to_string(), target_type: "TEXT".to_string() },
                ColumnSchema { name: "amount".to_string(), target_type: "REAL".to_string() },
            ]
        );
        assert_eq!(
            translated.sql,
            "CREATE TABLE \"items\" (\"id\" BLOB NOT NULL, \"value\" TEXT NOT NULL, \"amount\" REAL, PRIMARY KEY (\"id\")) WITHOUT ROWID;"
        );
    }

    #[test]
    fn test_table_constraints() {
        let translations = translate_query(
            "CREATE TABLE child (a TEXT, b TEXT, parent_id UUID, PRIMARY KEY (a, b), \
             FOREIGN KEY (parent_id) REFERENCES parent (id));",
        );
        let translated = supported(&translations[0]);
        let SchemaChange::CreateTable(table) = &translated.change else {
            panic!("expected table creation");
        };

        assert_eq!(table.primary_key, vec!["a", "b"]);
        assert_eq!(
            table.foreign_keys,
            vec![ForeignKey {
                columns: vec!["parent_id".to_string()],
                references_table: "parent".to_string(),
                references_columns: vec!["id".to_string()],
            }]
        );
        assert!(translated.sql.contains("FOREIGN KEY (\"parent_id\") REFERENCES \"parent\" (\"id\")"));
    }

    #[test]
    fn test_inline_foreign_key() {
        let translations = translate_query("CREATE TABLE child (id TEXT PRIMARY KEY, parent UUID REFERENCES parent(id));");
        let SchemaChange::CreateTable(table) = &supported(&translations[0]).change else {
            panic!("expected table creation");
        };
        assert_eq!(table.foreign_keys.len(), 1);
        assert_eq!(table.foreign_keys[0].columns, vec!["parent"]);
    }

    #[test]
    fn test_add_column() {
        let translations = translate_query("ALTER TABLE items ADD COLUMN note VARCHAR(20);");
        let translated = supported(&translations[0]);

        assert_eq!(translated.kind, StatementKind::AlterAddColumn);
        assert_eq!(translated.sql, "ALTER TABLE \"items\" ADD COLUMN \"note\" TEXT;");
        assert_eq!(
            translated.change,
            SchemaChange::AddColumn {
                table: "items".to_string(),
                column: ColumnSchema { name: "note".to_string(), target_type: "TEXT".to_string() },
                foreign_key: None,
            }
        );
    }

    #[test]
    fn test_create_index() {
        let translations = translate_query("CREATE UNIQUE INDEX items_value ON items (value);");
        let translated = supported(&translations[0]);
        assert_eq!(translated.kind, StatementKind::CreateIndex);
        assert_eq!(translated.sql, "CREATE UNIQUE INDEX \"items_value\" ON \"items\" (\"value\");");
    }

    #[test]
    fn test_unsupported_statements_dropped() {
        for query in [
            "CREATE PUBLICATION all_tables FOR ALL TABLES;",
            "ALTER TABLE items DROP COLUMN value;",
            "DROP TABLE items;",
            "this is not sql",
        ] {
            let translations = translate_query(query);
            assert!(!translations.is_empty());
            assert!(
                translations.iter().all(|t| matches!(t, Translation::Dropped(_))),
                "expected {} to be dropped",
                query
            );
        }
    }

    #[test]
    fn test_multiple_statements_keep_order() {
        let translations = translate_query("CREATE TABLE a (id TEXT PRIMARY KEY); CREATE TABLE b (id TEXT PRIMARY KEY);");
        let names: Vec<String> = translations
            .iter()
            .map(|t| match &supported(t).change {
                SchemaChange::CreateTable(table) => table.name.clone(),
                other => panic!("unexpected change {:?}", other),
            })
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
