//! # Keyfold Testing
//!
//! Testing utilities for the keyfold pipeline.
//!
//! This crate provides:
//! - [`InMemoryLog`]: a fast, deterministic [`EventLog`] implementation
//!   for exercising the worker, emitter, and view replica without a
//!   broker
//! - [`helpers`]: small builders for wire records
//!
//! ## Example
//!
//! ```
//! use keyfold_core::log::{EventLog, LogRecord};
//! use keyfold_testing::InMemoryLog;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = InMemoryLog::new();
//! log.publish("observations", LogRecord::new("3".to_string(), vec![1, 2])).await?;
//!
//! // Replay is a bounded scan of everything published so far.
//! let mut stream = log.replay("observations").await?;
//! let record = stream.next().await.transpose()?;
//! assert_eq!(record.map(|r| r.key), Some("3".to_string()));
//! assert!(stream.next().await.is_none());
//! # Ok(())
//! # }
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use futures::stream;
use keyfold_core::log::{EventLog, LogError, LogRecord, RecordStream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Per-topic state: everything published so far plus live subscribers.
#[derive(Default)]
struct TopicState {
    records: Vec<LogRecord>,
    subscribers: Vec<mpsc::UnboundedSender<Result<LogRecord, LogError>>>,
}

/// In-memory [`EventLog`] for fast, deterministic tests.
///
/// Behaves like a single-partition log with an `earliest` offset-reset
/// policy: a subscription first receives every record published before
/// it, then live records as they are published. [`replay`] snapshots the
/// topic at call time and streams exactly that prefix, matching the
/// bounded high-watermark scan of the Kafka implementation.
///
/// Single-partition means per-key ordering holds trivially, which is the
/// property the pipeline relies on.
///
/// [`replay`]: EventLog::replay
#[derive(Clone, Default)]
pub struct InMemoryLog {
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
}

impl InMemoryLog {
    /// Create a new empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records published to a topic so far.
    ///
    /// Useful for assertions on changelog growth.
    #[must_use]
    pub fn len(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .map_or(0, |t| t.records.len())
    }

    /// Whether a topic has no records.
    #[must_use]
    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Snapshot of all records currently on a topic, in publish order.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .map_or_else(Vec::new, |t| t.records.clone())
    }
}

impl EventLog for InMemoryLog {
    fn publish(
        &self,
        topic: &str,
        record: LogRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let mut topics = self.topics.lock().unwrap();
            let state = topics.entry(topic).or_default();
            // Forward to live subscribers, pruning any that hung up.
            state
                .subscribers
                .retain(|tx| tx.send(Ok(record.clone())).is_ok());
            state.records.push(record);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        _group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<RecordStream, LogError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            {
                let mut topics = self.topics.lock().unwrap();
                let state = topics.entry(topic).or_default();
                for record in &state.records {
                    // Receiver is still in scope; sends cannot fail here.
                    let _ = tx.send(Ok(record.clone()));
                }
                state.subscribers.push(tx);
            }

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };
            Ok(Box::pin(stream) as RecordStream)
        })
    }

    fn replay(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<RecordStream, LogError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let snapshot = self.records(&topic);
            let stream = stream::iter(snapshot.into_iter().map(Ok::<LogRecord, LogError>));
            Ok(Box::pin(stream) as RecordStream)
        })
    }
}

/// Builders for wire records used across the workspace's tests.
pub mod helpers {
    use keyfold_core::record::{AggregateState, Event};

    /// Build an [`Event`] from literals.
    #[must_use]
    pub fn event(observed_at: &str, amount: i32) -> Event {
        Event {
            observed_at: observed_at.to_string(),
            amount,
        }
    }

    /// Build an [`AggregateState`] from literals.
    #[must_use]
    pub fn state(first_seen_at: &str, last_seen_at: &str, total: i32) -> AggregateState {
        AggregateState {
            first_seen_at: first_seen_at.to_string(),
            last_seen_at: last_seen_at.to_string(),
            total,
        }
    }
}

pub use helpers::{event, state};

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn record(key: &str, payload: &[u8]) -> LogRecord {
        LogRecord::new(key.to_string(), payload.to_vec())
    }

    #[tokio::test]
    async fn publish_then_replay_returns_snapshot() {
        let log = InMemoryLog::new();
        log.publish("t", record("a", b"1")).await.unwrap();
        log.publish("t", record("b", b"2")).await.unwrap();

        let mut replayed = log.replay("t").await.unwrap();
        assert_eq!(replayed.next().await.unwrap().unwrap().key, "a");
        assert_eq!(replayed.next().await.unwrap().unwrap().key, "b");
        assert!(replayed.next().await.is_none());
    }

    #[tokio::test]
    async fn replay_is_bounded_at_call_time() {
        let log = InMemoryLog::new();
        log.publish("t", record("a", b"1")).await.unwrap();

        let mut replayed = log.replay("t").await.unwrap();
        // Published after the replay started; must not appear.
        log.publish("t", record("b", b"2")).await.unwrap();

        assert_eq!(replayed.next().await.unwrap().unwrap().key, "a");
        assert!(replayed.next().await.is_none());
    }

    #[tokio::test]
    async fn subscribe_sees_backlog_then_live_records() {
        let log = InMemoryLog::new();
        log.publish("t", record("a", b"1")).await.unwrap();

        let mut stream = log.subscribe("t", "g").await.unwrap();
        log.publish("t", record("b", b"2")).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().key, "a");
        assert_eq!(stream.next().await.unwrap().unwrap().key, "b");
    }

    #[tokio::test]
    async fn replay_of_unknown_topic_is_empty() {
        let log = InMemoryLog::new();
        let mut replayed = log.replay("nothing-here").await.unwrap();
        assert!(replayed.next().await.is_none());
    }
}
