//! Keyed table abstraction: the durable per-key state store.
//!
//! The table maps each aggregation key to its current
//! [`AggregateState`]. It is partition-scoped and exclusively owned by
//! the worker for its assigned partitions; readers (the view) hold a
//! separate, eventually-consistent replica and never go through this
//! trait.
//!
//! Durability contract: a [`set`](KeyedTable::set) is committed only once
//! it is reflected in a durable, replayable record (the changelog), so a
//! crash followed by reassignment can rebuild the table by replaying the
//! changelog last-value-wins. The changelog stores post-fold state
//! snapshots, not events, so recovery never re-runs the fold.

use crate::record::AggregateState;
use std::future::Future;
use thiserror::Error;

/// Errors from the keyed table.
#[derive(Error, Debug)]
pub enum TableError {
    /// The durable changelog write behind a `set` failed. The `set` did
    /// not commit and the in-memory state was not updated.
    #[error("changelog write for key '{key}' failed: {reason}")]
    Changelog {
        /// Key whose write failed.
        key: String,
        /// Reason reported by the log substrate.
        reason: String,
    },

    /// The backing store itself failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable, partition-scoped mapping from key to current aggregate.
pub trait KeyedTable: Send + Sync {
    /// Look up the current aggregate for a key.
    ///
    /// Returns `None` for a key that has never been folded; absence is a
    /// normal outcome, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Storage`] if the lookup itself fails.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<AggregateState>, TableError>> + Send;

    /// Store the post-fold aggregate for a key.
    ///
    /// Must not resolve successfully before the state is durably
    /// recorded; the worker processes the partition's next event only
    /// after `set` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Changelog`] if the durable write is not
    /// acknowledged. The caller treats this as fatal for the partition.
    fn set(
        &self,
        key: &str,
        state: AggregateState,
    ) -> impl Future<Output = Result<(), TableError>> + Send;
}
