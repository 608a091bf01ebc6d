use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use log::{debug, info};

use model::{CausalTag, Relation};

use crate::backend::RowStore;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::types::{Row, RowKey, RowMutation};

/// A single shard containing a portion of the rows
struct Shard {
    rows: HashMap<Relation, HashMap<RowKey, Row>>,
}

impl Shard {
    fn new() -> Self {
        Shard {
            rows: HashMap::new(),
        }
    }
}

/// Sharded in-memory row store
///
/// Rows are distributed across shards by the hash of (relation, key). Each
/// shard has its own RwLock, so writes to different keys rarely contend and
/// writes to the same key are serialized by that key's shard lock.
pub struct ShardedRowStore {
    shards: Vec<Arc<RwLock<Shard>>>,
    shard_count: usize,
    max_rows: usize,
    row_count: AtomicUsize,
}

impl ShardedRowStore {
    /// Create a store with the default configuration
    pub fn new() -> Self {
        Self::with_config(&StoreConfig::default())
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        // Ensure shard count is a power of 2
        let count = config.shard_count.max(1).next_power_of_two();

        let shards = (0..count)
            .map(|_| Arc::new(RwLock::new(Shard::new())))
            .collect();

        info!("ShardedRowStore initialized with {} shards", count);

        ShardedRowStore {
            shards,
            shard_count: count,
            max_rows: config.max_rows,
            row_count: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn shard_index(&self, relation: &Relation, key: &RowKey) -> usize {
        let mut hasher = DefaultHasher::new();
        relation.hash(&mut hasher);
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.shard_count - 1)
    }

    /// Total number of rows, tombstones included
    pub fn row_count(&self) -> usize {
        self.row_count.load(Ordering::SeqCst)
    }

    /// Rows of a relation that are currently present
    pub async fn live_rows(&self, relation: &Relation) -> Vec<Row> {
        let mut live = Vec::new();
        for shard in &self.shards {
            let shard = shard.read().await;
            if let Some(rows) = shard.rows.get(relation) {
                live.extend(rows.values().filter(|r| !r.is_deleted()).cloned());
            }
        }
        live
    }
}

impl Default for ShardedRowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RowStore for ShardedRowStore {
    async fn apply(&self, relation: &Relation, key: &RowKey, mutation: RowMutation) -> Result<Row, StoreError> {
        let idx = self.shard_index(relation, key);
        let mut shard = self.shards[idx].write().await;
        let rows = shard.rows.entry(relation.clone()).or_default();

        let is_new = !rows.contains_key(key);
        if is_new && self.max_rows > 0 && self.row_count.load(Ordering::SeqCst) >= self.max_rows {
            return Err(StoreError::CapacityExceeded {
                max_rows: self.max_rows,
            });
        }

        let row = rows.entry(key.clone()).or_insert_with(|| Row::new(key.clone()));
        if is_new {
            self.row_count.fetch_add(1, Ordering::SeqCst);
            debug!("Created row in {} (shard {})", relation, idx);
        }
        row.apply(&mutation);
        Ok(row.clone())
    }

    async fn get(&self, relation: &Relation, key: &RowKey) -> Option<Row> {
        let idx = self.shard_index(relation, key);
        let shard = self.shards[idx].read().await;
        shard.rows.get(relation)?.get(key).cloned()
    }

    async fn liveness_snapshot(&self, relation: &Relation) -> Vec<(RowKey, BTreeSet<CausalTag>)> {
        let mut snapshot = Vec::new();
        for shard in &self.shards {
            let shard = shard.read().await;
            if let Some(rows) = shard.rows.get(relation) {
                snapshot.extend(rows.iter().map(|(key, row)| (key.clone(), row.liveness().tags().clone())));
            }
        }
        snapshot
    }
}
