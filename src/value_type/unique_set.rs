//! Append/remove set column value

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A set of unique elements with pending additions and removals.
///
/// `added` and `removed` are always disjoint, and only ever describe a real
/// change against the baseline: adding an element the baseline already holds
/// or removing one it does not is a no-op. Element order is insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniqueSet {
    baseline: Vec<Value>,
    added: Vec<Value>,
    removed: Vec<Value>,
    fixed: bool,
}

impl UniqueSet {
    /// Set loaded from the store; duplicates are dropped
    pub fn new(items: impl IntoIterator<Item = Value>) -> Self {
        Self {
            baseline: dedup(items),
            ..Self::default()
        }
    }

    pub fn current(&self) -> &[Value] {
        &self.baseline
    }

    pub fn added(&self) -> &[Value] {
        &self.added
    }

    pub fn removed(&self) -> &[Value] {
        &self.removed
    }

    /// `(baseline ∪ added) − removed`
    pub fn calculated(&self) -> Vec<Value> {
        self.baseline
            .iter()
            .filter(|v| !self.removed.contains(v))
            .chain(self.added.iter())
            .cloned()
            .collect()
    }

    pub fn contains(&self, item: &Value) -> bool {
        self.added.contains(item) || (self.baseline.contains(item) && !self.removed.contains(item))
    }

    pub fn add(&mut self, item: impl Into<Value>) -> &mut Self {
        let item = item.into();
        self.removed.retain(|v| *v != item);
        if !self.baseline.contains(&item) && !self.added.contains(&item) {
            self.added.push(item);
        }
        self
    }

    pub fn remove(&mut self, item: impl Into<Value>) -> &mut Self {
        let item = item.into();
        self.added.retain(|v| *v != item);
        if self.baseline.contains(&item) && !self.removed.contains(&item) {
            self.removed.push(item);
        }
        self
    }

    /// Replace the whole set; the write becomes a literal assignment.
    pub fn set_value(&mut self, items: impl IntoIterator<Item = Value>) -> &mut Self {
        self.baseline = dedup(items);
        self.added.clear();
        self.removed.clear();
        self.fixed = true;
        self
    }

    pub fn has_changed(&self) -> bool {
        self.fixed || !self.added.is_empty() || !self.removed.is_empty()
    }

    pub fn is_fixed_value(&self) -> bool {
        self.fixed
    }

    pub fn commit(&mut self) {
        self.baseline = self.calculated();
        self.added.clear();
        self.removed.clear();
        self.fixed = false;
    }
}

fn dedup(items: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text(s: &str) -> Value {
        Value::from(s)
    }

    #[test]
    fn test_add_and_remove_stay_disjoint() {
        let mut set = UniqueSet::new(vec![text("a"), text("b")]);
        set.add("c").remove("a");
        assert_eq!(set.added(), &[text("c")]);
        assert_eq!(set.removed(), &[text("a")]);

        set.add("a");
        assert!(set.removed().is_empty());
        assert!(set.added().iter().all(|v| *v != text("a")));
        assert_eq!(set.calculated(), vec![text("a"), text("b"), text("c")]);
    }

    #[test]
    fn test_add_existing_is_noop() {
        let mut set = UniqueSet::new(vec![text("a")]);
        set.add("a");
        assert!(!set.has_changed());
    }

    #[test]
    fn test_add_then_remove_new_element_is_no_change() {
        let mut set = UniqueSet::new(vec![text("a")]);
        set.add("z").remove("z");
        assert!(!set.has_changed());
        assert_eq!(set.calculated(), vec![text("a")]);
    }

    #[test]
    fn test_set_value_is_fixed() {
        let mut set = UniqueSet::new(vec![text("a")]);
        set.add("b");
        set.set_value(vec![text("x"), text("x"), text("y")]);
        assert!(set.is_fixed_value());
        assert!(set.has_changed());
        assert!(set.added().is_empty());
        assert_eq!(set.calculated(), vec![text("x"), text("y")]);
    }

    #[test]
    fn test_commit() {
        let mut set = UniqueSet::new(vec![text("a"), text("b")]);
        set.remove("a").add("c");
        set.commit();
        assert!(!set.has_changed());
        assert_eq!(set.current(), &[text("b"), text("c")]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0u8..8).prop_map(Op::Add), (0u8..8).prop_map(Op::Remove)]
    }

    proptest! {
        #[test]
        fn prop_calculated_matches_sequential_model(
            baseline in proptest::collection::vec(0u8..8, 0..6),
            ops in proptest::collection::vec(op(), 0..30),
        ) {
            let mut set = UniqueSet::new(baseline.iter().map(|b| Value::from(i64::from(*b))));
            let mut model: std::collections::BTreeSet<u8> = baseline.iter().copied().collect();

            for op in &ops {
                match op {
                    Op::Add(x) => {
                        set.add(i64::from(*x));
                        model.insert(*x);
                    }
                    Op::Remove(x) => {
                        set.remove(i64::from(*x));
                        model.remove(x);
                    }
                }
            }

            let mut got: Vec<i64> = set.calculated().iter().filter_map(Value::as_i64).collect();
            got.sort();
            let want: Vec<i64> = model.iter().map(|x| i64::from(*x)).collect();
            prop_assert_eq!(got, want);

            for v in set.added() {
                prop_assert!(!set.removed().contains(v));
            }
        }
    }
}
