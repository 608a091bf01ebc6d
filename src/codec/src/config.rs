use model::Relation;

/// Default cap on an encoded transaction (64 MB)
const DEFAULT_MAX_MESSAGE_SIZE: u64 = 64 * 1024 * 1024;
/// Bodies at least this large are LZ4-compressed
const DEFAULT_COMPRESSION_THRESHOLD: usize = 4096;

/// Transaction codec configuration
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Namespace holding the system migration relations
    pub system_namespace: String,
    /// Relation with one record per captured DDL statement
    /// (`id, query, txid, txts, version`)
    pub ddl_table: String,
    /// Relation with one record per migration version (`txid, txts, version`)
    pub migrations_table: String,
    pub max_message_size: u64,
    /// 0 disables compression
    pub compression_threshold: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            system_namespace: "replication".to_string(),
            ddl_table: "ddl_commands".to_string(),
            migrations_table: "migrations".to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl CodecConfig {
    pub fn ddl_relation(&self) -> Relation {
        Relation::new(&self.system_namespace, &self.ddl_table)
    }

    pub fn migrations_relation(&self) -> Relation {
        Relation::new(&self.system_namespace, &self.migrations_table)
    }

    /// Set the namespace of the system relations
    pub fn with_system_namespace(mut self, namespace: &str) -> Self {
        self.system_namespace = namespace.to_string();
        self
    }

    pub fn with_max_message_size(mut self, max: u64) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(namespace) = std::env::var("CAUSEWAY_SYSTEM_NAMESPACE") {
            config.system_namespace = namespace;
        }

        if let Ok(table) = std::env::var("CAUSEWAY_DDL_TABLE") {
            config.ddl_table = table;
        }

        if let Ok(table) = std::env::var("CAUSEWAY_MIGRATIONS_TABLE") {
            config.migrations_table = table;
        }

        if let Ok(size) = std::env::var("CAUSEWAY_MAX_MESSAGE_SIZE") {
            match size.parse() {
                Ok(n) => config.max_message_size = n,
                Err(_) => log::warn!("Invalid CAUSEWAY_MAX_MESSAGE_SIZE '{}', using default", size),
            }
        }

        if let Ok(threshold) = std::env::var("CAUSEWAY_COMPRESSION_THRESHOLD") {
            match threshold.parse() {
                Ok(n) => config.compression_threshold = n,
                Err(_) => log::warn!("Invalid CAUSEWAY_COMPRESSION_THRESHOLD '{}', using default", threshold),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_relations() {
        let config = CodecConfig::default().with_system_namespace("sys");
        assert_eq!(config.ddl_relation(), Relation::new("sys", "ddl_commands"));
        assert_eq!(config.migrations_relation(), Relation::new("sys", "migrations"));
    }
}
