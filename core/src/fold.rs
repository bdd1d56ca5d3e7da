//! The fold function: merging an incoming event into per-key state.
//!
//! [`fold`] is the heart of the aggregation engine. It is a pure function
//! with no side effects; persisting the returned state is the keyed
//! table's responsibility, invoked by the partition worker immediately
//! after, before the next event of the partition is processed.
//!
//! # Semantics
//!
//! - Totals are commutative: any replay order of the same event multiset
//!   yields the same `total` (32-bit wrapping sum of `amount`s).
//! - Timestamps are order-sensitive: `first_seen_at` is the
//!   `observed_at` of whichever event arrived first, `last_seen_at` of
//!   whichever arrived last.
//!
//! # Example
//!
//! ```
//! use keyfold_core::fold::fold;
//! use keyfold_core::record::Event;
//!
//! # fn main() -> Result<(), keyfold_core::fold::FoldError> {
//! let first = Event { observed_at: "T1".to_string(), amount: 2 };
//! let second = Event { observed_at: "T2".to_string(), amount: 5 };
//!
//! let state = fold(None, &first)?;
//! let state = fold(Some(&state), &second)?;
//!
//! assert_eq!(state.first_seen_at, "T1");
//! assert_eq!(state.last_seen_at, "T2");
//! assert_eq!(state.total, 7);
//! # Ok(())
//! # }
//! ```

use crate::record::{AggregateState, Event};
use thiserror::Error;

/// The prior state handed to [`fold`] violated a table invariant.
#[derive(Error, Debug)]
pub enum FoldError {
    /// An existing aggregate carried an empty `first_seen_at`.
    ///
    /// Every state ever written by [`fold`] has a non-empty
    /// `first_seen_at` (it is copied from the triggering event on first
    /// fold and carried over afterwards), so this can only mean the table
    /// or its changelog was corrupted or populated by something else.
    /// Surfaced as an error rather than repaired in place; the owning
    /// worker treats it as fatal.
    #[error(
        "prior state has empty first_seen_at (last_seen_at: '{last_seen_at}', total: {total}); \
         table or changelog is corrupt"
    )]
    CorruptPriorState {
        /// `last_seen_at` of the corrupt state, for diagnostics.
        last_seen_at: String,
        /// `total` of the corrupt state, for diagnostics.
        total: i32,
    },
}

/// Fold one event into the existing aggregate for its key.
///
/// With no prior state (first event ever seen for the key) the returned
/// aggregate starts both timestamps at `event.observed_at` and the total
/// at `event.amount`. With prior state, `first_seen_at` is carried over,
/// `last_seen_at` is overwritten, and the total is the wrapping sum.
///
/// # Errors
///
/// Returns [`FoldError::CorruptPriorState`] if the prior state has an
/// empty `first_seen_at`. See the variant docs for why this is flagged
/// instead of repaired.
pub fn fold(prior: Option<&AggregateState>, event: &Event) -> Result<AggregateState, FoldError> {
    match prior {
        None => Ok(AggregateState {
            first_seen_at: event.observed_at.clone(),
            last_seen_at: event.observed_at.clone(),
            total: event.amount,
        }),
        Some(state) => {
            if state.first_seen_at.is_empty() {
                return Err(FoldError::CorruptPriorState {
                    last_seen_at: state.last_seen_at.clone(),
                    total: state.total,
                });
            }
            Ok(AggregateState {
                first_seen_at: state.first_seen_at.clone(),
                last_seen_at: event.observed_at.clone(),
                total: state.total.wrapping_add(event.amount),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(observed_at: &str, amount: i32) -> Event {
        Event {
            observed_at: observed_at.to_string(),
            amount,
        }
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn first_event_initializes_both_timestamps() {
        let state = fold(None, &event("T1", 9)).expect("first fold should succeed");
        assert_eq!(state.first_seen_at, "T1");
        assert_eq!(state.last_seen_at, "T1");
        assert_eq!(state.total, 9);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn subsequent_fold_carries_first_and_overwrites_last() {
        let state = fold(None, &event("T1", 2)).expect("first fold should succeed");
        let state = fold(Some(&state), &event("T2", 5)).expect("second fold should succeed");
        assert_eq!(state.first_seen_at, "T1");
        assert_eq!(state.last_seen_at, "T2");
        assert_eq!(state.total, 7);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn total_wraps_on_overflow() {
        let state = fold(None, &event("T1", i32::MAX)).expect("first fold should succeed");
        let state = fold(Some(&state), &event("T2", 1)).expect("second fold should succeed");
        assert_eq!(state.total, i32::MIN);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn total_is_permutation_invariant() {
        let events = [
            event("T1", 3),
            event("T2", -8),
            event("T3", 20),
            event("T4", 0),
        ];
        // Each permutation replays the same multiset sequentially.
        let orders: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]];

        for order in orders {
            let mut state: Option<AggregateState> = None;
            for idx in order {
                state =
                    Some(fold(state.as_ref(), &events[idx]).expect("fold should succeed"));
            }
            let state = state.expect("at least one event was folded");
            assert_eq!(state.total, 15);
            // Timestamps come from the permutation's endpoints, but must
            // each belong to some event in the set.
            assert!(events.iter().any(|e| e.observed_at == state.first_seen_at));
            assert!(events.iter().any(|e| e.observed_at == state.last_seen_at));
        }
    }

    #[test]
    fn empty_first_seen_at_is_flagged_not_repaired() {
        let corrupt = AggregateState {
            first_seen_at: String::new(),
            last_seen_at: "T5".to_string(),
            total: 11,
        };
        let result = fold(Some(&corrupt), &event("T6", 1));
        assert!(matches!(
            result,
            Err(FoldError::CorruptPriorState { total: 11, .. })
        ));
    }
}
