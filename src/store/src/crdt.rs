//! CRDT building blocks for replicated rows
//!
//! Rows written by several replicas at once use two CRDTs:
//!
//! - [`LivenessSet`]: an add-wins observed-remove set of causal tags. A row is
//!   present while the set is non-empty.
//! - [`FieldRegister`]: a last-writer register per column, ordered by the
//!   writing tag's (timestamp, origin), so concurrent updates of different
//!   columns both survive.

use std::collections::BTreeSet;

use model::{CausalTag, ColumnValue};
use serde::{Deserialize, Serialize};

/// Add-wins observed-remove set of causal tags
///
/// Removing only affects tags the remover listed in its context, so an add
/// the remover never saw always survives the merge. Every removed tag is
/// remembered; a late-arriving add of an already-removed tag stays removed,
/// which keeps the outcome independent of delivery order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessSet {
    /// Tags added and not causally removed
    tags: BTreeSet<CausalTag>,
    /// Union of all removal contexts applied so far
    removed: BTreeSet<CausalTag>,
}

impl LivenessSet {
    pub fn new() -> Self {
        LivenessSet::default()
    }

    /// Add a tag. Returns true if the set changed.
    pub fn add(&mut self, tag: &CausalTag) -> bool {
        if self.removed.contains(tag) {
            return false;
        }
        self.tags.insert(tag.clone())
    }

    /// Remove every tag in `context`. Tags not yet seen here are remembered
    /// so their add is cancelled when it arrives.
    pub fn remove_observed<'a, I>(&mut self, context: I)
    where
        I: IntoIterator<Item = &'a CausalTag>,
    {
        for tag in context {
            self.tags.remove(tag);
            self.removed.insert(tag.clone());
        }
    }

    pub fn contains(&self, tag: &CausalTag) -> bool {
        self.tags.contains(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Live tags (the row's current causal context for removals)
    pub fn tags(&self) -> &BTreeSet<CausalTag> {
        &self.tags
    }
}

/// Last-writer register for one column value
///
/// A register created by [`fill`](Self::fill) holds a value copied from a
/// writer's full record rather than one it changed. Any direct write beats
/// it, and fills only compete with each other by tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRegister {
    value: ColumnValue,
    tag: CausalTag,
    #[serde(default)]
    filled: bool,
}

impl FieldRegister {
    pub fn new(value: ColumnValue, tag: CausalTag) -> Self {
        FieldRegister { value, tag, filled: false }
    }

    pub fn filled(value: ColumnValue, tag: CausalTag) -> Self {
        FieldRegister { value, tag, filled: true }
    }

    /// Offer a filler value. Returns true if it replaced the current value.
    pub fn fill(&mut self, value: ColumnValue, tag: &CausalTag) -> bool {
        if self.filled && supersedes(tag, &self.tag) {
            self.value = value;
            self.tag = tag.clone();
            true
        } else {
            false
        }
    }

    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// Write under `tag`. Returns true if it replaced the current value.
    /// A write under the register's own tag comes later in the same
    /// transaction and replaces the value.
    pub fn write(&mut self, value: ColumnValue, tag: &CausalTag) -> bool {
        if self.filled || *tag == self.tag || supersedes(tag, &self.tag) {
            self.value = value;
            self.tag = tag.clone();
            self.filled = false;
            true
        } else {
            false
        }
    }

    pub fn value(&self) -> &ColumnValue {
        &self.value
    }

    pub fn tag(&self) -> &CausalTag {
        &self.tag
    }
}

/// Total order on writes: timestamp first, origin breaks ties
fn supersedes(incoming: &CausalTag, current: &CausalTag) -> bool {
    (incoming.timestamp_ms(), incoming.origin()) > (current.timestamp_ms(), current.origin())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(origin: &str, ts: u64) -> CausalTag {
        CausalTag::new(origin, ts)
    }

    #[test]
    fn test_liveness_add_is_idempotent() {
        let mut set = LivenessSet::new();
        assert!(set.add(&tag("a", 1)));
        assert!(!set.add(&tag("a", 1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_unobserved_add_survives_remove() {
        let mut set = LivenessSet::new();
        set.add(&tag("a", 1));
        set.remove_observed(std::iter::empty());
        assert!(!set.is_empty());
    }

    #[test]
    fn test_observed_remove() {
        let mut set = LivenessSet::new();
        set.add(&tag("a", 1));
        set.add(&tag("b", 2));
        set.remove_observed([tag("a", 1)].iter());

        assert!(!set.contains(&tag("a", 1)));
        assert!(set.contains(&tag("b", 2)));
    }

    #[test]
    fn test_remove_before_add_converges() {
        // Delivery order must not matter
        let mut first = LivenessSet::new();
        first.add(&tag("a", 1));
        first.remove_observed([tag("a", 1)].iter());

        let mut second = LivenessSet::new();
        second.remove_observed([tag("a", 1)].iter());
        assert!(!second.add(&tag("a", 1)));

        assert_eq!(first, second);
        assert!(second.is_empty());
    }

    #[test]
    fn test_register_last_writer() {
        let mut register = FieldRegister::new(Some(b"old".to_vec()), tag("a", 10));

        assert!(!register.write(Some(b"stale".to_vec()), &tag("b", 5)));
        assert_eq!(register.value(), &Some(b"old".to_vec()));

        assert!(register.write(Some(b"new".to_vec()), &tag("b", 20)));
        assert_eq!(register.value(), &Some(b"new".to_vec()));
        assert_eq!(register.tag(), &tag("b", 20));
    }

    #[test]
    fn test_register_ties_break_on_origin() {
        let mut left = FieldRegister::new(Some(b"x".to_vec()), tag("a", 10));
        left.write(Some(b"y".to_vec()), &tag("b", 10));

        let mut right = FieldRegister::new(Some(b"y".to_vec()), tag("b", 10));
        right.write(Some(b"x".to_vec()), &tag("a", 10));

        assert_eq!(left, right);
        assert_eq!(left.value(), &Some(b"y".to_vec()));
    }

    #[test]
    fn test_register_same_tag_overwrites() {
        let mut register = FieldRegister::new(Some(b"first".to_vec()), tag("a", 10));
        assert!(register.write(Some(b"second".to_vec()), &tag("a", 10)));
        assert_eq!(register.value(), &Some(b"second".to_vec()));
    }

    #[test]
    fn test_direct_write_beats_fill_in_any_order() {
        let mut filled_first = FieldRegister::filled(Some(b"stale".to_vec()), tag("b", 9));
        filled_first.write(Some(b"x".to_vec()), &tag("a", 1));

        let mut written_first = FieldRegister::new(Some(b"x".to_vec()), tag("a", 1));
        assert!(!written_first.fill(Some(b"stale".to_vec()), &tag("b", 9)));

        assert_eq!(filled_first, written_first);
        assert!(!filled_first.is_filled());
    }

    #[test]
    fn test_fills_compete_by_tag() {
        let mut reg = FieldRegister::filled(Some(b"old".to_vec()), tag("a", 1));
        assert!(reg.fill(Some(b"new".to_vec()), &tag("b", 2)));
        assert!(!reg.fill(Some(b"older".to_vec()), &tag("c", 1)));
        assert_eq!(reg.value(), &Some(b"new".to_vec()));
        assert!(reg.is_filled());
    }
}
