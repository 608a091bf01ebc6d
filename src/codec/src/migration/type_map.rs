//! Source column types to replica storage types.

pub const BLOB: &str = "BLOB";
pub const TEXT: &str = "TEXT";
pub const INTEGER: &str = "INTEGER";
pub const REAL: &str = "REAL";

/// Fixed mapping table, keyed by the upper-cased base type name
const TYPE_MAP: &[(&str, &str)] = &[
    ("UUID", BLOB),
    ("BYTEA", BLOB),
    ("TEXT", TEXT),
    ("VARCHAR", TEXT),
    ("CHARACTER VARYING", TEXT),
    ("CHAR", TEXT),
    ("CHARACTER", TEXT),
    ("CITEXT", TEXT),
    ("JSON", TEXT),
    ("JSONB", TEXT),
    ("DATE", TEXT),
    ("TIME", TEXT),
    ("TIMETZ", TEXT),
    ("TIMESTAMP", TEXT),
    ("TIMESTAMPTZ", TEXT),
    ("INTERVAL", TEXT),
    ("SMALLINT", INTEGER),
    ("INT", INTEGER),
    ("INTEGER", INTEGER),
    ("BIGINT", INTEGER),
    ("INT2", INTEGER),
    ("INT4", INTEGER),
    ("INT8", INTEGER),
    ("SERIAL", INTEGER),
    ("BIGSERIAL", INTEGER),
    ("SMALLSERIAL", INTEGER),
    ("BOOLEAN", INTEGER),
    ("BOOL", INTEGER),
    ("REAL", REAL),
    ("FLOAT", REAL),
    ("FLOAT4", REAL),
    ("FLOAT8", REAL),
    ("DOUBLE PRECISION", REAL),
    ("DOUBLE", REAL),
    ("NUMERIC", REAL),
    ("DECIMAL", REAL),
];

/// Strip modifiers so `VARCHAR(255)` and `TIMESTAMP WITH TIME ZONE` find
/// their table entry.
fn base_type(source: &str) -> String {
    let upper = source.trim().to_uppercase();
    let base = upper.split('(').next().unwrap_or_default().trim();
    let base = base
        .strip_suffix(" WITH TIME ZONE")
        .or_else(|| base.strip_suffix(" WITHOUT TIME ZONE"))
        .unwrap_or(base);
    base.trim().to_string()
}

/// Look up the replica storage type for a source column type.
/// Array types and unknown types have no entry.
pub fn target_type(source: &str) -> Option<&'static str> {
    if source.trim_end().ends_with("[]") {
        return None;
    }
    let base = base_type(source);
    TYPE_MAP
        .iter()
        .find(|(name, _)| *name == base)
        .map(|(_, target)| *target)
}
