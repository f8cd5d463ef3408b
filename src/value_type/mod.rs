//! Value types - scalar, counter and set property values
//!
//! A property holds exactly one of three shapes:
//! - `Scalar`: a plain value compared against the saved snapshot
//! - `Counter`: a baseline plus a pending server-side delta
//! - `Set`: a baseline set plus pending element additions/removals
//!
//! Statement building matches on [`PropertyValue`] to pick the fragment a
//! property contributes to a write.

pub mod counter;
pub mod unique_set;

pub use counter::Counter;
pub use unique_set::UniqueSet;

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// The declared shape of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Scalar,
    Counter,
    Set,
}

impl PropertyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKind::Scalar => "scalar",
            PropertyKind::Counter => "counter",
            PropertyKind::Set => "set",
        }
    }
}

/// A point-in-time view of a property, as reported by `diff()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Snapshot {
    Scalar(Value),
    Items(Vec<Value>),
}

/// The value held by one property of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Scalar(Value),
    Counter(Counter),
    Set(UniqueSet),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Scalar(_) => PropertyKind::Scalar,
            PropertyValue::Counter(_) => PropertyKind::Counter,
            PropertyValue::Set(_) => PropertyKind::Set,
        }
    }

    /// Value as last loaded or saved
    pub fn current_snapshot(&self) -> Snapshot {
        match self {
            PropertyValue::Scalar(v) => Snapshot::Scalar(v.clone()),
            PropertyValue::Counter(c) => Snapshot::Scalar(Value::Integer(c.current())),
            PropertyValue::Set(s) => Snapshot::Items(s.current().to_vec()),
        }
    }

    /// Value once pending changes are applied
    pub fn calculated_snapshot(&self) -> Snapshot {
        match self {
            PropertyValue::Scalar(v) => Snapshot::Scalar(v.clone()),
            PropertyValue::Counter(c) => Snapshot::Scalar(Value::Integer(c.calculated())),
            PropertyValue::Set(s) => Snapshot::Items(s.calculated()),
        }
    }

    /// Whether this value differs from the saved snapshot `saved`.
    ///
    /// Counters and sets carry their own pending state, so the snapshot is
    /// only consulted for scalars.
    pub fn has_changed_from(&self, saved: &PropertyValue) -> bool {
        match self {
            PropertyValue::Scalar(v) => match saved {
                PropertyValue::Scalar(s) => v != s,
                _ => true,
            },
            PropertyValue::Counter(c) => c.has_changed(),
            PropertyValue::Set(s) => s.has_changed(),
        }
    }

    pub fn is_fixed_value(&self) -> bool {
        match self {
            PropertyValue::Scalar(_) => true,
            PropertyValue::Counter(c) => c.is_fixed_value(),
            PropertyValue::Set(s) => s.is_fixed_value(),
        }
    }

    /// Fold pending changes into the baseline
    pub fn commit(&mut self) {
        match self {
            PropertyValue::Scalar(_) => {}
            PropertyValue::Counter(c) => c.commit(),
            PropertyValue::Set(s) => s.commit(),
        }
    }

    /// Empty value of the given kind
    pub fn empty(kind: PropertyKind) -> Self {
        match kind {
            PropertyKind::Scalar => PropertyValue::Scalar(Value::Null),
            PropertyKind::Counter => PropertyValue::Counter(Counter::default()),
            PropertyKind::Set => PropertyValue::Set(UniqueSet::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_changed_against_snapshot() {
        let saved = PropertyValue::Scalar(Value::from("a"));
        let same = PropertyValue::Scalar(Value::from("a"));
        let other = PropertyValue::Scalar(Value::from("b"));
        assert!(!same.has_changed_from(&saved));
        assert!(other.has_changed_from(&saved));
    }

    #[test]
    fn test_counter_snapshots() {
        let mut c = Counter::new(2);
        c.increment(3);
        let value = PropertyValue::Counter(c);
        assert_eq!(value.current_snapshot(), Snapshot::Scalar(Value::Integer(2)));
        assert_eq!(value.calculated_snapshot(), Snapshot::Scalar(Value::Integer(5)));
        assert!(!value.is_fixed_value());
    }
}
