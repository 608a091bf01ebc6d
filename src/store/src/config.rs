/// Row store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of shards (rounded up to a power of 2, default: 64)
    pub shard_count: usize,
    /// Maximum number of rows, tombstones included (0 = unlimited)
    pub max_rows: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            shard_count: 64,
            max_rows: 0,
        }
    }
}

impl StoreConfig {
    /// Set the number of shards
    pub fn with_shard_count(mut self, count: usize) -> Self {
        self.shard_count = count;
        self
    }

    /// Set the row limit
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(count) = std::env::var("CAUSEWAY_STORE_SHARDS") {
            match count.parse() {
                Ok(n) if n > 0 => config.shard_count = n,
                _ => log::warn!("Invalid CAUSEWAY_STORE_SHARDS '{}', using default", count),
            }
        }

        if let Ok(max) = std::env::var("CAUSEWAY_STORE_MAX_ROWS") {
            match max.parse() {
                Ok(n) => config.max_rows = n,
                Err(_) => log::warn!("Invalid CAUSEWAY_STORE_MAX_ROWS '{}', using default", max),
            }
        }

        config
    }
}
