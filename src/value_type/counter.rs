//! Server-side counter value

use serde::{Deserialize, Serialize};

/// A monotonic counter: a loaded baseline plus a signed pending delta.
///
/// The store applies the delta relative to its own value (`c = c + ?`), so
/// concurrent writers never overwrite each other. An explicit
/// [`set_value`](Counter::set_value) turns the counter into a fixed value that
/// is written as a literal assignment instead.
///
/// Arithmetic saturates at the `i64` bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    baseline: i64,
    delta: i64,
    fixed: bool,
}

impl Counter {
    /// Counter loaded from the store with the given value
    pub fn new(baseline: i64) -> Self {
        Self {
            baseline,
            delta: 0,
            fixed: false,
        }
    }

    /// Last loaded (or fixed) value, ignoring the pending delta
    pub fn current(&self) -> i64 {
        self.baseline
    }

    /// Value the store will hold once the pending change is applied
    pub fn calculated(&self) -> i64 {
        self.baseline.saturating_add(self.delta)
    }

    pub fn pending_delta(&self) -> i64 {
        self.delta
    }

    pub fn increment(&mut self, by: i64) -> &mut Self {
        if self.fixed {
            self.baseline = self.baseline.saturating_add(by);
        } else {
            self.delta = self.delta.saturating_add(by);
        }
        self
    }

    pub fn decrement(&mut self, by: i64) -> &mut Self {
        if self.fixed {
            self.baseline = self.baseline.saturating_sub(by);
        } else {
            self.delta = self.delta.saturating_sub(by);
        }
        self
    }

    /// Replace the value outright; the write becomes a literal assignment.
    pub fn set_value(&mut self, value: i64) -> &mut Self {
        self.baseline = value;
        self.delta = 0;
        self.fixed = true;
        self
    }

    pub fn has_changed(&self) -> bool {
        self.fixed || self.delta != 0
    }

    pub fn is_increment(&self) -> bool {
        !self.fixed && self.delta > 0
    }

    pub fn is_decrement(&self) -> bool {
        !self.fixed && self.delta < 0
    }

    pub fn is_fixed_value(&self) -> bool {
        self.fixed
    }

    /// Fold the pending change into the baseline after a successful write
    pub fn commit(&mut self) {
        self.baseline = self.calculated();
        self.delta = 0;
        self.fixed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unchanged_counter() {
        let counter = Counter::new(4);
        assert!(!counter.has_changed());
        assert!(!counter.is_increment());
        assert!(!counter.is_decrement());
        assert!(!counter.is_fixed_value());
        assert_eq!(counter.calculated(), 4);
    }

    #[test]
    fn test_increment_then_decrement() {
        let mut counter = Counter::new(0);
        counter.increment(10).decrement(5);
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.calculated(), 5);
        assert_eq!(counter.pending_delta(), 5);
        assert!(counter.is_increment());
        assert!(!counter.is_decrement());
    }

    #[test]
    fn test_set_value_is_fixed() {
        let mut counter = Counter::new(3);
        counter.increment(2);
        counter.set_value(42);
        assert_eq!(counter.calculated(), 42);
        assert_eq!(counter.current(), 42);
        assert!(counter.has_changed());
        assert!(counter.is_fixed_value());
        assert!(!counter.is_increment());

        counter.increment(1);
        assert!(counter.is_fixed_value());
        assert_eq!(counter.calculated(), 43);
        assert_eq!(counter.current(), 43);
    }

    #[test]
    fn test_commit_clears_pending_state() {
        let mut counter = Counter::new(1);
        counter.decrement(3);
        assert!(counter.is_decrement());
        counter.commit();
        assert_eq!(counter.current(), -2);
        assert!(!counter.has_changed());
    }

    #[test]
    fn test_arithmetic_saturates_at_bounds() {
        let mut counter = Counter::new(i64::MAX);
        counter.increment(1);
        assert_eq!(counter.calculated(), i64::MAX);
        assert!(counter.is_increment());

        let mut counter = Counter::new(0);
        counter.decrement(i64::MIN);
        assert_eq!(counter.pending_delta(), i64::MAX);

        let mut counter = Counter::new(i64::MIN);
        counter.decrement(i64::MAX).decrement(i64::MAX);
        assert_eq!(counter.calculated(), i64::MIN);
        counter.commit();
        assert_eq!(counter.current(), i64::MIN);

        let mut counter = Counter::new(0);
        counter.set_value(i64::MIN).decrement(1);
        assert_eq!(counter.current(), i64::MIN);
    }

    proptest! {
        #[test]
        fn prop_calculated_is_baseline_plus_deltas(
            baseline in -1_000i64..1_000,
            deltas in proptest::collection::vec(-100i64..100, 0..20),
        ) {
            let mut counter = Counter::new(baseline);
            for d in &deltas {
                counter.increment(*d);
            }
            let sum: i64 = deltas.iter().sum();
            prop_assert_eq!(counter.calculated(), counter.current() + sum);

            if counter.has_changed() {
                let states = [counter.is_increment(), counter.is_decrement(), counter.is_fixed_value()];
                prop_assert_eq!(states.iter().filter(|s| **s).count(), 1);
            }
        }
    }
}
