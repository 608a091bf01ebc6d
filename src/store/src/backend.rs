use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use model::{CausalTag, Relation};

use crate::error::StoreError;
use crate::types::{Row, RowKey, RowMutation};

/// Multi-writer row store used by the conflict resolver.
///
/// `apply` must be an atomic read-merge-write for the given key: concurrent
/// calls on the same key are serialized, and a missing row is created first.
pub trait RowStore: Send + Sync {
    fn apply(
        &self,
        relation: &Relation,
        key: &RowKey,
        mutation: RowMutation,
    ) -> impl Future<Output = Result<Row, StoreError>> + Send;

    fn get(&self, relation: &Relation, key: &RowKey) -> impl Future<Output = Option<Row>> + Send;

    /// Every row of the relation with its live tags, tombstones included
    fn liveness_snapshot(
        &self,
        relation: &Relation,
    ) -> impl Future<Output = Vec<(RowKey, BTreeSet<CausalTag>)>> + Send;
}

impl<T: RowStore> RowStore for Arc<T> {
    fn apply(
        &self,
        relation: &Relation,
        key: &RowKey,
        mutation: RowMutation,
    ) -> impl Future<Output = Result<Row, StoreError>> + Send {
        (**self).apply(relation, key, mutation)
    }

    fn get(&self, relation: &Relation, key: &RowKey) -> impl Future<Output = Option<Row>> + Send {
        (**self).get(relation, key)
    }

    fn liveness_snapshot(
        &self,
        relation: &Relation,
    ) -> impl Future<Output = Vec<(RowKey, BTreeSet<CausalTag>)>> + Send {
        (**self).liveness_snapshot(relation)
    }
}
