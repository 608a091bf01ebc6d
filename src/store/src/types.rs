use std::collections::{BTreeMap, BTreeSet};

use model::{CausalTag, ColumnValue, Record};
use serde::{Deserialize, Serialize};

use crate::crdt::{FieldRegister, LivenessSet};

/// Primary key tuple, one value per key column in key order
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey(pub Vec<Vec<u8>>);

/// Replica-side state of one logical row.
///
/// Rows are never removed from the store; an empty liveness set is the
/// tombstone, which keeps later concurrent resurrection well-defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    key: RowKey,
    fields: BTreeMap<String, FieldRegister>,
    liveness: LivenessSet,
}

impl Row {
    pub fn new(key: RowKey) -> Self {
        Row {
            key,
            fields: BTreeMap::new(),
            liveness: LivenessSet::new(),
        }
    }

    pub fn key(&self) -> &RowKey {
        &self.key
    }

    pub fn liveness(&self) -> &LivenessSet {
        &self.liveness
    }

    pub fn is_deleted(&self) -> bool {
        self.liveness.is_empty()
    }

    pub fn field(&self, column: &str) -> Option<&ColumnValue> {
        self.fields.get(column).map(FieldRegister::value)
    }

    /// Current column values as a record
    pub fn record(&self) -> Record {
        self.fields
            .iter()
            .map(|(column, register)| (column.clone(), register.value().clone()))
            .collect()
    }

    /// Merge a mutation into the row.
    ///
    /// The mutation's own tag is never removed, so an insert followed by an
    /// update in one transaction (both under the same tag) keeps the row.
    /// Base values fill columns no direct write has reached and give way to
    /// any later direct write.
    pub fn apply(&mut self, mutation: &RowMutation) {
        let own = mutation.tag.as_ref();
        self.liveness
            .remove_observed(mutation.remove_context.iter().filter(|t| Some(*t) != own));

        if let Some(tag) = own {
            for (column, value) in &mutation.writes {
                match self.fields.get_mut(column) {
                    Some(register) => {
                        register.write(value.clone(), tag);
                    }
                    None => {
                        self.fields
                            .insert(column.clone(), FieldRegister::new(value.clone(), tag.clone()));
                    }
                }
            }
            for (column, value) in &mutation.base {
                match self.fields.get_mut(column) {
                    Some(register) => {
                        register.fill(value.clone(), tag);
                    }
                    None => {
                        self.fields
                            .insert(column.clone(), FieldRegister::filled(value.clone(), tag.clone()));
                    }
                }
            }
            self.liveness.add(tag);
        }
    }
}

/// A read-merge-write request for one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowMutation {
    /// Column writes, stamped with `tag`
    pub writes: Record,
    /// Full record of the writer; fills columns no direct write has reached
    pub base: Record,
    /// Tag to add to liveness; also orders the field writes
    pub tag: Option<CausalTag>,
    /// Tags the writer observed and wants removed
    pub remove_context: BTreeSet<CausalTag>,
}

impl RowMutation {
    pub fn insert(record: Record, tag: CausalTag) -> Self {
        RowMutation {
            writes: record,
            base: Record::new(),
            tag: Some(tag),
            remove_context: BTreeSet::new(),
        }
    }

    pub fn update(writes: Record, tag: CausalTag, observed: BTreeSet<CausalTag>) -> Self {
        RowMutation {
            writes,
            base: Record::new(),
            tag: Some(tag),
            remove_context: observed,
        }
    }

    /// Attach the writer's full record as filler for columns no direct write
    /// has reached
    pub fn with_base(mut self, base: Record) -> Self {
        self.base = base;
        self
    }

    pub fn delete(observed: BTreeSet<CausalTag>) -> Self {
        RowMutation {
            writes: Record::new(),
            base: Record::new(),
            tag: None,
            remove_context: observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> RowKey {
        RowKey(vec![id.as_bytes().to_vec()])
    }

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.as_bytes().to_vec())))
            .collect()
    }

    #[test]
    fn test_insert_then_delete() {
        let a = CausalTag::new("a", 1);
        let mut row = Row::new(key("1"));

        row.apply(&RowMutation::insert(record(&[("value", "x")]), a.clone()));
        assert!(!row.is_deleted());
        assert_eq!(row.field("value"), Some(&Some(b"x".to_vec())));

        row.apply(&RowMutation::delete([a].into_iter().collect()));
        assert!(row.is_deleted());
        // Fields stay around for a later resurrection
        assert_eq!(row.record().len(), 1);
    }

    #[test]
    fn test_update_replaces_observed_tag() {
        let a = CausalTag::new("a", 1);
        let b = CausalTag::new("b", 2);
        let mut row = Row::new(key("1"));

        row.apply(&RowMutation::insert(record(&[("value", "x")]), a.clone()));
        row.apply(&RowMutation::update(record(&[("value", "y")]), b.clone(), [a.clone()].into_iter().collect()));

        assert!(!row.liveness().contains(&a));
        assert!(row.liveness().contains(&b));
        assert_eq!(row.record(), record(&[("value", "y")]));
    }

    #[test]
    fn test_update_observing_own_tag_keeps_row() {
        let a = CausalTag::new("a", 10);
        let mut row = Row::new(key("1"));

        row.apply(&RowMutation::insert(record(&[("value", "x")]), a.clone()));
        row.apply(&RowMutation::update(record(&[("value", "y")]), a.clone(), [a.clone()].into_iter().collect()));

        assert!(!row.is_deleted());
        assert!(row.liveness().contains(&a));
        assert_eq!(row.field("value"), Some(&Some(b"y".to_vec())));
    }

    #[test]
    fn test_base_fills_only_missing_columns() {
        let a = CausalTag::new("a", 1);
        let b = CausalTag::new("b", 2);
        let mut row = Row::new(key("1"));

        row.apply(&RowMutation::insert(record(&[("id", "1"), ("x", "0")]), a));
        row.apply(
            &RowMutation::update(record(&[("y", "9")]), b, BTreeSet::new())
                .with_base(record(&[("id", "1"), ("x", "stale"), ("y", "9"), ("z", "new")])),
        );

        assert_eq!(row.record(), record(&[("id", "1"), ("x", "0"), ("y", "9"), ("z", "new")]));
    }

    #[test]
    fn test_base_yields_to_concurrent_insert_in_any_order() {
        let inserted = RowMutation::insert(record(&[("id", "1"), ("x", "0")]), CausalTag::new("a", 1));
        let updated = RowMutation::update(record(&[("y", "9")]), CausalTag::new("b", 5), BTreeSet::new())
            .with_base(record(&[("id", "1"), ("x", "stale"), ("y", "9")]));

        let mut one = Row::new(key("1"));
        one.apply(&inserted);
        one.apply(&updated);
        let mut two = Row::new(key("1"));
        two.apply(&updated);
        two.apply(&inserted);

        assert_eq!(one, two);
        assert_eq!(one.record(), record(&[("id", "1"), ("x", "0"), ("y", "9")]));
    }
}
