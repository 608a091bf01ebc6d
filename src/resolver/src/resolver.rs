use std::collections::BTreeSet;

use log::{debug, warn};

use model::{CausalTag, Change, Record, Relation, SchemaRegistry, Transaction};
use store::{RowKey, RowMutation, RowStore};

use crate::error::ResolveError;

/// Applies changes to a causally tracked row store.
///
/// Liveness of a row is the set of tags added by inserts and updates minus
/// the tags removed by writers that observed them. A tag the remover never
/// saw survives, so concurrent insert or update beats delete.
pub struct ConflictResolver<R, S> {
    registry: R,
    store: S,
}

impl<R: SchemaRegistry, S: RowStore> ConflictResolver<R, S> {
    pub fn new(registry: R, store: S) -> Self {
        ConflictResolver { registry, store }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply one change under `tag`
    pub async fn apply(&self, change: &Change, tag: &CausalTag) -> Result<(), ResolveError> {
        match change {
            Change::Insert { relation, record, .. } => {
                let key = self.row_key(relation, record)?;
                self.store
                    .apply(relation, &key, RowMutation::insert(record.clone(), tag.clone()))
                    .await?;
            }
            Change::Update {
                relation,
                old_record,
                record,
                tags,
            } => {
                let key = self.row_key(relation, old_record.as_ref().unwrap_or(record))?;
                if old_record.is_some() && self.row_key(relation, record)? != key {
                    warn!("Primary key of a row in {} changed by update, keeping the old key", relation);
                }
                // Changed columns win against concurrent writers; the rest of
                // the record only fills columns this replica has not seen
                let mutation = match old_record {
                    Some(old) => RowMutation::update(changed_columns(old, record), tag.clone(), observed(tags))
                        .with_base(record.clone()),
                    None => RowMutation::update(record.clone(), tag.clone(), observed(tags)),
                };
                self.store.apply(relation, &key, mutation).await?;
            }
            Change::Delete {
                relation,
                old_record,
                tags,
            } => {
                let key = self.row_key(relation, old_record)?;
                self.store.apply(relation, &key, RowMutation::delete(observed(tags))).await?;
            }
            Change::TruncateRelation { relation } => self.truncate(relation).await?,
        }
        Ok(())
    }

    /// Apply every change of a transaction in order under the transaction's
    /// tag, then acknowledge it. Returns the number of changes applied.
    ///
    /// On error the transaction is not acknowledged; earlier changes stay
    /// applied and the caller retries the whole transaction.
    pub async fn apply_transaction(&self, txn: &mut Transaction) -> Result<usize, ResolveError> {
        let tag = txn.causal_tag();
        for change in &txn.changes {
            self.apply(change, &tag).await?;
        }

        let acknowledged = txn.acknowledge();
        debug!(
            "Applied {} changes from {} at {} (acknowledged: {})",
            txn.changes.len(),
            txn.origin,
            txn.log_position,
            acknowledged
        );
        Ok(txn.changes.len())
    }

    /// Delete every row of the relation using its full current liveness as
    /// removal context. Writes not yet applied here are not covered.
    async fn truncate(&self, relation: &Relation) -> Result<(), ResolveError> {
        let snapshot = self.store.liveness_snapshot(relation).await;
        let mut cleared = 0;
        for (key, tags) in snapshot {
            if tags.is_empty() {
                continue;
            }
            self.store.apply(relation, &key, RowMutation::delete(tags)).await?;
            cleared += 1;
        }
        warn!("Truncated {}: {} rows cleared", relation, cleared);
        Ok(())
    }

    fn row_key(&self, relation: &Relation, record: &Record) -> Result<RowKey, ResolveError> {
        let primary_key = self.registry.lookup_primary_key(relation)?;
        let values = primary_key
            .into_iter()
            .map(|column| match record.get(&column) {
                Some(Some(value)) => Ok(value.clone()),
                _ => Err(ResolveError::MissingKeyColumn {
                    relation: relation.clone(),
                    column,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RowKey(values))
    }
}

fn observed(tags: &[CausalTag]) -> BTreeSet<CausalTag> {
    tags.iter().cloned().collect()
}

/// Columns whose value differs between the old and the new record
fn changed_columns(old: &Record, new: &Record) -> Record {
    new.iter()
        .filter(|(column, value)| old.get(*column) != Some(*value))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect()
}
