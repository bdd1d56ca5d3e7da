//! Event log abstraction over the partitioned log substrate.
//!
//! The pipeline does not implement a log; it assumes one. This module
//! defines the [`EventLog`] trait the core needs from that collaborator:
//! an append-only, partitioned, replicated log with at-least-once
//! delivery, per-partition ordering, and stable key-to-partition hashing.
//!
//! Production uses the Kafka-backed implementation in `keyfold-kafka`;
//! tests use the in-memory implementation in `keyfold-testing`.
//!
//! # Delivery semantics
//!
//! - [`publish`](EventLog::publish) resolves only once the log has
//!   acknowledged the write. Changelog durability is built on this.
//! - [`subscribe`](EventLog::subscribe) joins a consumer group and yields
//!   records in partition order, at least once across restarts.
//! - [`replay`](EventLog::replay) is the recovery path: a bounded scan of
//!   a topic from its earliest offset up to the high watermark captured
//!   at call time. The stream ends when the watermark is reached; ending
//!   early is reported as [`LogError::ReplayIncomplete`] so a recovering
//!   worker never serves from a partially rebuilt table.
//!
//! # Dyn compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of `async fn` so the
//! trait can be used as `Arc<dyn EventLog>` and shared across the
//! emitter, worker, and view follower.

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the log substrate.
#[derive(Error, Debug, Clone)]
pub enum LogError {
    /// Could not reach or configure the log.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An append was not acknowledged.
    #[error("publish to topic '{topic}' failed: {reason}")]
    PublishFailed {
        /// Topic the append targeted.
        topic: String,
        /// Reason reported by the substrate.
        reason: String,
    },

    /// Could not join the topic as a consumer.
    #[error("subscription to topic '{topic}' failed: {reason}")]
    SubscriptionFailed {
        /// Topic the subscription targeted.
        topic: String,
        /// Reason reported by the substrate.
        reason: String,
    },

    /// A recovery scan could not be started.
    #[error("replay of topic '{topic}' failed: {reason}")]
    ReplayFailed {
        /// Topic being replayed.
        topic: String,
        /// Reason reported by the substrate.
        reason: String,
    },

    /// A recovery scan ended before reaching the high watermark captured
    /// at its start. The consumer must not serve traffic from the
    /// partially rebuilt state.
    #[error(
        "replay of topic '{topic}' ended at offset {reached} before the high watermark {expected}"
    )]
    ReplayIncomplete {
        /// Topic being replayed.
        topic: String,
        /// High watermark captured when the replay started.
        expected: i64,
        /// Offset actually reached.
        reached: i64,
    },

    /// A consumed message had no payload where a record was required.
    #[error("record on topic '{topic}' has no payload")]
    MissingPayload {
        /// Topic the record came from.
        topic: String,
    },

    /// A consumed message had no key. Keyless records cannot be folded
    /// or materialized.
    #[error("record on topic '{topic}' has no key")]
    MissingKey {
        /// Topic the record came from.
        topic: String,
    },

    /// Transient transport failure while consuming.
    #[error("transport error: {0}")]
    Transport(String),
}

/// One record as it travels on the log: the aggregation key as the
/// message key, the encoded record as the payload.
///
/// The payload bytes are opaque at this layer; which record kind they
/// hold (and in which [`WireFormat`]) is fixed per topic by
/// configuration.
///
/// [`WireFormat`]: crate::record::WireFormat
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Aggregation key. Also the partitioning key: the substrate hashes
    /// it so every record for one key lands on one partition.
    pub key: String,
    /// Encoded record bytes.
    pub payload: Vec<u8>,
}

impl LogRecord {
    /// Create a record from a key and encoded payload.
    #[must_use]
    pub const fn new(key: String, payload: Vec<u8>) -> Self {
        Self { key, payload }
    }
}

/// Stream of records from a subscription or replay.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<LogRecord, LogError>> + Send>>;

/// The partitioned log substrate, as seen by the core.
///
/// Implementations must preserve per-partition order and route every
/// record for one key to one partition deterministically. Cross-partition
/// ordering is explicitly not guaranteed.
pub trait EventLog: Send + Sync {
    /// Append one keyed record to a topic, resolving only after the log
    /// acknowledges the write.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::PublishFailed`] if the append is not
    /// acknowledged.
    fn publish(
        &self,
        topic: &str,
        record: LogRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>>;

    /// Join a topic as a member of `group` and stream records in
    /// partition order with at-least-once delivery.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::SubscriptionFailed`] if the group cannot be
    /// joined. Per-record failures are yielded inside the stream.
    fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<RecordStream, LogError>> + Send + '_>>;

    /// Scan a topic from its earliest offset up to the high watermark
    /// captured at call time, then end the stream.
    ///
    /// Used for changelog recovery. The scan carries no consumer group
    /// and commits nothing.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ReplayFailed`] if the scan cannot start.
    /// [`LogError::ReplayIncomplete`] is yielded inside the stream when
    /// the scan ends before its captured watermark.
    fn replay(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<RecordStream, LogError>> + Send + '_>>;
}
