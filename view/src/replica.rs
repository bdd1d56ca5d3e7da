//! Read-only table replica fed by the changelog.
//!
//! The replica is the view's private copy of the keyed table. It is
//! rebuilt and kept current the same way the processor recovers: by
//! consuming the changelog's post-fold state snapshots last-value-wins.
//! Nothing in the serving path ever writes to it.

use crate::error::ViewError;
use futures::StreamExt;
use keyfold_core::log::EventLog;
use keyfold_core::record::{AggregateState, WireFormat, WireRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};

/// What the view needs to know, passed explicitly at construction.
#[derive(Clone, Debug)]
pub struct ViewConfig {
    /// Changelog topic to follow.
    pub changelog_topic: String,
    /// Consumer group for the follower. Distinct per view instance so
    /// each replica sees the full changelog; the underlying log must be
    /// configured to start new groups from the earliest offset.
    pub group: String,
    /// Wire format of the changelog. Must match the processor's.
    pub format: WireFormat,
}

impl ViewConfig {
    /// Bundle the three knobs into a config.
    #[must_use]
    pub fn new(
        changelog_topic: impl Into<String>,
        group: impl Into<String>,
        format: WireFormat,
    ) -> Self {
        Self {
            changelog_topic: changelog_topic.into(),
            group: group.into(),
            format,
        }
    }
}

/// Eventually-consistent, read-only copy of the keyed table.
///
/// Cheap to clone; clones share the same underlying map. HTTP handlers
/// hold one clone, the follower task another.
#[derive(Clone, Default)]
pub struct TableReplica {
    entries: Arc<RwLock<HashMap<String, AggregateState>>>,
}

impl TableReplica {
    /// Create an empty replica.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current aggregate for a key, or `None` if no fold for the key has
    /// reached this replica yet. Absence is a normal outcome.
    pub async fn lookup(&self, key: &str) -> Option<AggregateState> {
        self.entries.read().await.get(key).cloned()
    }

    /// Number of keys currently replicated.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the replica holds no keys yet.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Consume the changelog and keep this replica current until the
    /// shutdown signal flips.
    ///
    /// Applies every snapshot last-value-wins. Ready records are drained
    /// before shutdown is honored. Transport errors on the stream are
    /// logged and consumption continues; an undecodable record stops the
    /// follower.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Log`] if the subscription fails and
    /// [`ViewError::ChangelogDecode`] on a malformed changelog record.
    pub async fn follow(
        &self,
        log: Arc<dyn EventLog>,
        config: &ViewConfig,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ViewError> {
        tracing::info!(
            changelog = %config.changelog_topic,
            group = %config.group,
            "view follower starting"
        );

        let mut records = log
            .subscribe(&config.changelog_topic, &config.group)
            .await?;

        loop {
            tokio::select! {
                biased;

                Some(next) = records.next() => {
                    match next {
                        Ok(record) => {
                            let state =
                                AggregateState::decode(&record.payload, config.format)?;
                            tracing::debug!(
                                key = %record.key,
                                total = state.total,
                                "replica updated"
                            );
                            self.entries.write().await.insert(record.key, state);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "changelog stream error");
                        }
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                else => break,
            }
        }

        tracing::info!(group = %config.group, "view follower stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use keyfold_core::log::LogRecord;
    use keyfold_testing::{InMemoryLog, state};

    fn config() -> ViewConfig {
        ViewConfig::new("group-table", "view", WireFormat::Binary)
    }

    async fn publish_state(log: &InMemoryLog, key: &str, s: &AggregateState) {
        log.publish(
            "group-table",
            LogRecord::new(key.to_string(), s.encode(WireFormat::Binary).unwrap()),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn follower_applies_last_value_per_key() {
        let log = Arc::new(InMemoryLog::new());
        publish_state(&log, "3", &state("T1", "T1", 2)).await;
        publish_state(&log, "3", &state("T1", "T2", 7)).await;
        publish_state(&log, "5", &state("T3", "T3", 1)).await;

        let replica = TableReplica::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        replica.follow(log, &config(), shutdown_rx).await.unwrap();

        assert_eq!(replica.lookup("3").await, Some(state("T1", "T2", 7)));
        assert_eq!(replica.lookup("5").await, Some(state("T3", "T3", 1)));
        assert_eq!(replica.len().await, 2);
    }

    #[tokio::test]
    async fn lookup_of_never_folded_key_is_absent() {
        let replica = TableReplica::new();
        assert_eq!(replica.lookup("9").await, None);
        assert!(replica.is_empty().await);
    }

    #[tokio::test]
    async fn follower_stops_on_malformed_changelog_record() {
        let log = Arc::new(InMemoryLog::new());
        log.publish(
            "group-table",
            LogRecord::new("3".to_string(), b"garbage".to_vec()),
        )
        .await
        .unwrap();

        let replica = TableReplica::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        let result = replica.follow(log, &config(), shutdown_rx).await;

        assert!(matches!(result, Err(ViewError::ChangelogDecode(_))));
        assert!(replica.is_empty().await);
    }
}
