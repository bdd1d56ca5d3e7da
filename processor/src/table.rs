//! Changelog-backed keyed table.
//!
//! [`ChangelogTable`] materializes the per-key aggregates of one worker's
//! partition assignment as an in-memory map whose every write is first
//! recorded on a changelog topic. The changelog stores post-fold state
//! snapshots, so rebuilding the table is a last-value-wins replay with no
//! re-folding.

use keyfold_core::log::{EventLog, LogRecord};
use keyfold_core::record::{AggregateState, WireFormat, WireRecord};
use keyfold_core::table::{KeyedTable, TableError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Durable keyed table: in-memory map plus changelog topic.
///
/// Exclusively owned by its worker; nothing else writes to it. The
/// durability order is fixed: [`set`](KeyedTable::set) publishes the new
/// state to the changelog and waits for the log's acknowledgement before
/// the in-memory map is touched. A crash between the two leaves the
/// changelog ahead of memory, which the next recovery replay resolves
/// (last value wins).
pub struct ChangelogTable {
    log: Arc<dyn EventLog>,
    changelog_topic: String,
    format: WireFormat,
    entries: RwLock<HashMap<String, AggregateState>>,
}

impl ChangelogTable {
    /// Create an empty table writing its changelog to `changelog_topic`
    /// in the given wire format.
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        changelog_topic: impl Into<String>,
        format: WireFormat,
    ) -> Self {
        Self {
            log,
            changelog_topic: changelog_topic.into(),
            format,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Apply a replayed changelog record to memory only.
    ///
    /// Used during recovery: the record is already durable on the
    /// changelog, so re-publishing it would append a duplicate on every
    /// restart.
    pub async fn restore(&self, key: &str, state: AggregateState) {
        self.entries.write().await.insert(key.to_string(), state);
    }

    /// Number of keys currently materialized.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no key has been materialized yet.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl KeyedTable for ChangelogTable {
    async fn get(&self, key: &str) -> Result<Option<AggregateState>, TableError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, state: AggregateState) -> Result<(), TableError> {
        let payload = state.encode(self.format).map_err(|e| TableError::Changelog {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        // Durable first: the set is committed only once the changelog
        // acknowledges the write.
        self.log
            .publish(
                &self.changelog_topic,
                LogRecord::new(key.to_string(), payload),
            )
            .await
            .map_err(|e| TableError::Changelog {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        self.entries.write().await.insert(key.to_string(), state);
        Ok(())
    }
}
