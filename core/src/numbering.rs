//! Per-letter ticket numbering.
//!
//! Each category letter has its own sequence. The next number is the most recently
//! issued one plus one, wrapping to `1` once `max_sequence` is passed. Numbers still
//! held by an active ticket of the same letter are skipped, so a wrap never hands out
//! a duplicate of somebody who is still waiting.
//!
//! Stores call [`NumberingPolicy::next_sequence`] while holding a per-letter lock
//! (an advisory transaction lock in Postgres), which makes allocate-and-insert atomic.

use serde::{Deserialize, Serialize};

/// Default ceiling; the next number after `A999` is `A001`.
pub const DEFAULT_MAX_SEQUENCE: u32 = 999;

/// Numbering configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingPolicy {
    max_sequence: u32,
}

impl Default for NumberingPolicy {
    fn default() -> Self {
        Self {
            max_sequence: DEFAULT_MAX_SEQUENCE,
        }
    }
}

impl NumberingPolicy {
    /// Create a policy with the given ceiling (at least 1).
    #[must_use]
    pub fn new(max_sequence: u32) -> Self {
        Self {
            max_sequence: max_sequence.max(1),
        }
    }

    /// Highest sequence issued before wrapping.
    #[must_use]
    pub const fn max_sequence(&self) -> u32 {
        self.max_sequence
    }

    /// Pick the next sequence after `last_issued`, skipping numbers for which
    /// `is_taken` returns true.
    ///
    /// Returns `None` when every number in `1..=max_sequence` is taken.
    pub fn next_sequence(
        &self,
        last_issued: Option<u32>,
        is_taken: impl Fn(u32) -> bool,
    ) -> Option<u32> {
        let mut candidate = last_issued.map_or(1, |n| self.advance(n));
        for _ in 0..self.max_sequence {
            if !is_taken(candidate) {
                return Some(candidate);
            }
            candidate = self.advance(candidate);
        }
        None
    }

    const fn advance(&self, n: u32) -> u32 {
        if n >= self.max_sequence { 1 } else { n + 1 }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn first_ticket_of_the_day_is_one() {
        let policy = NumberingPolicy::default();
        assert_eq!(policy.next_sequence(None, |_| false), Some(1));
    }

    #[test]
    fn increments_from_last_issued() {
        let policy = NumberingPolicy::default();
        assert_eq!(policy.next_sequence(Some(41), |_| false), Some(42));
    }

    #[test]
    fn wraps_after_ceiling() {
        let policy = NumberingPolicy::new(999);
        assert_eq!(policy.next_sequence(Some(999), |_| false), Some(1));
    }

    #[test]
    fn wrap_skips_numbers_still_waiting() {
        let policy = NumberingPolicy::new(5);
        let waiting: HashSet<u32> = [1, 2].into_iter().collect();
        assert_eq!(
            policy.next_sequence(Some(5), |n| waiting.contains(&n)),
            Some(3)
        );
    }

    #[test]
    fn exhausted_when_every_number_is_active() {
        let policy = NumberingPolicy::new(3);
        assert_eq!(policy.next_sequence(Some(2), |_| true), None);
    }

    #[test]
    fn zero_ceiling_is_clamped() {
        let policy = NumberingPolicy::new(0);
        assert_eq!(policy.max_sequence(), 1);
        assert_eq!(policy.next_sequence(Some(1), |_| false), Some(1));
    }

    proptest! {
        #[test]
        fn never_returns_a_taken_or_out_of_range_number(
            max in 1u32..50,
            last in proptest::option::of(1u32..50),
            taken in proptest::collection::hash_set(1u32..50, 0..60),
        ) {
            let policy = NumberingPolicy::new(max);
            let last = last.map(|l| l.min(max));
            match policy.next_sequence(last, |n| taken.contains(&n)) {
                Some(n) => {
                    prop_assert!((1..=max).contains(&n));
                    prop_assert!(!taken.contains(&n));
                }
                None => prop_assert!((1..=max).all(|n| taken.contains(&n))),
            }
        }

        #[test]
        fn without_contention_sequence_is_last_plus_one_modulo_ceiling(
            max in 1u32..2000,
            last in 1u32..2000,
        ) {
            let policy = NumberingPolicy::new(max);
            let last = last.min(max);
            let expected = if last == max { 1 } else { last + 1 };
            prop_assert_eq!(policy.next_sequence(Some(last), |_| false), Some(expected));
        }
    }
}
