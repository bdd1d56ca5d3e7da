//! Kafka-compatible event log for the keyfold pipeline.
//!
//! This crate provides the production implementation of the
//! [`EventLog`] trait from `keyfold-core`, backed by rdkafka. Any
//! Kafka-protocol broker works: Apache Kafka, Redpanda, AWS MSK.
//!
//! The broker supplies exactly the substrate properties the pipeline
//! assumes and does not reimplement:
//!
//! - **Partitioned, ordered log**: per-partition append order is
//!   delivery order
//! - **Stable key affinity**: the message key is hashed to pick the
//!   partition, so every record for one key lands on one partition
//! - **Consumer groups**: partition assignment and reassignment across
//!   processor instances
//! - **At-least-once delivery**: offsets are committed manually, only
//!   after a record has been handed to the consumer's channel
//!
//! # Replay
//!
//! [`replay`](EventLog::replay) is the recovery path: it captures each
//! partition's high watermark up front, scans from the earliest offset,
//! and ends the stream once every partition has reached its captured
//! watermark. Records published after the capture are not part of the
//! scan. No consumer group is involved and nothing is committed.
//!
//! # Example
//!
//! ```no_run
//! use keyfold_kafka::KafkaLog;
//! use keyfold_core::log::{EventLog, LogRecord};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = KafkaLog::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .auto_offset_reset("earliest")
//!     .build()?;
//!
//! log.publish("observations", LogRecord::new("3".to_string(), vec![1, 2])).await?;
//! # Ok(())
//! # }
//! ```

use futures::StreamExt;
use keyfold_core::log::{EventLog, LogError, LogRecord, RecordStream};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub mod admin;

pub use admin::{TopicSpec, ensure_topics};

/// Kafka-backed [`EventLog`].
///
/// Holds one shared producer; consumers are created per subscription or
/// replay. All knobs come from [`KafkaLogBuilder`]; there is no global
/// or environment-driven configuration.
pub struct KafkaLog {
    /// Shared producer for all publishes.
    producer: FutureProducer,
    /// Broker addresses (for creating consumers).
    brokers: String,
    /// Producer send timeout.
    timeout: Duration,
    /// Record buffer size between the broker consumer and subscribers.
    buffer_size: usize,
    /// Where new consumer groups start reading.
    auto_offset_reset: String,
}

impl KafkaLog {
    /// Create a log with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, LogError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the log.
    #[must_use]
    pub fn builder() -> KafkaLogBuilder {
        KafkaLogBuilder::default()
    }

    /// Broker addresses this log talks to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn consumer_config(&self, group: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false");
        config
    }
}

/// Builder for a [`KafkaLog`].
#[derive(Default)]
pub struct KafkaLogBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl KafkaLogBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1", or "all".
    ///
    /// Default: "1". The changelog topic should use "all" so a table
    /// write is durable on every replica before the fold continues.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none".
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the record buffer size between the broker consumer and a
    /// subscriber.
    ///
    /// Default: 1000.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set where new consumer groups start reading: "earliest",
    /// "latest", or "error".
    ///
    /// Default: "latest". Processors and views should use "earliest";
    /// a view that joins at "latest" would miss every key whose last
    /// fold predates it.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`KafkaLog`].
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<KafkaLog, LogError> {
        let brokers = self
            .brokers
            .ok_or_else(|| LogError::ConnectionFailed("brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            LogError::ConnectionFailed(format!("failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            compression = self.compression.as_deref().unwrap_or("none"),
            buffer_size = self.buffer_size.unwrap_or(1000),
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("latest"),
            "KafkaLog created"
        );

        Ok(KafkaLog {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "latest".to_string()),
        })
    }
}

impl EventLog for KafkaLog {
    fn publish(
        &self,
        topic: &str,
        record: LogRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>> {
        let topic = topic.to_string();
        let timeout = self.timeout;

        Box::pin(async move {
            // The aggregation key is the message key: the broker hashes
            // it for partition affinity, which is what keeps one key on
            // one partition.
            let kafka_record = FutureRecord::to(&topic)
                .payload(&record.payload)
                .key(record.key.as_bytes());

            match self.producer.send(kafka_record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = %record.key,
                        partition = partition,
                        offset = offset,
                        "record published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "publish failed");
                    Err(LogError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<RecordStream, LogError>> + Send + '_>> {
        let topic = topic.to_string();
        let group = group.to_string();
        let buffer_size = self.buffer_size;
        let config = self.consumer_config(&group);

        Box::pin(async move {
            let consumer: StreamConsumer =
                config.create().map_err(|e| LogError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| LogError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topic = %topic,
                group = %group,
                buffer_size = buffer_size,
                manual_commit = true,
                "subscribed"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The spawned task owns the consumer and forwards records.
            // Offsets are committed only AFTER a record reaches the
            // channel: a crash before commit redelivers (at-least-once).
            tokio::spawn(async move {
                let mut stream = consumer.stream();

                while let Some(next) = stream.next().await {
                    match next {
                        Ok(message) => {
                            let result = to_log_record(&topic, &message);

                            if tx.send(result).await.is_err() {
                                // Receiver dropped: exit WITHOUT
                                // committing so the record is redelivered
                                // to the group's next member.
                                tracing::debug!("subscriber dropped, consumer task exiting");
                                break;
                            }

                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "offset commit failed (record may be redelivered)"
                                );
                            }
                        }
                        Err(e) => {
                            let err = LogError::Transport(format!("receive failed: {e}"));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });

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
        let buffer_size = self.buffer_size;
        // The group is never committed to; it only satisfies the client
        // config. Assignment below is manual.
        let mut config = self.consumer_config(&format!("{topic}-replay"));
        config.set("auto.offset.reset", "earliest");

        Box::pin(async move {
            let consumer: StreamConsumer =
                config.create().map_err(|e| LogError::ReplayFailed {
                    topic: topic.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            let fetch_timeout = Duration::from_secs(10);
            let metadata = consumer
                .fetch_metadata(Some(&topic), fetch_timeout)
                .map_err(|e| LogError::ReplayFailed {
                    topic: topic.clone(),
                    reason: format!("failed to fetch metadata: {e}"),
                })?;

            let partitions: Vec<i32> = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .map(|t| t.partitions().iter().map(|p| p.id()).collect())
                .unwrap_or_default();

            // Capture each partition's high watermark up front; the scan
            // is bounded at exactly these offsets.
            let mut ends: HashMap<i32, i64> = HashMap::new();
            let mut assignment = TopicPartitionList::new();
            for partition in &partitions {
                let (low, high) = consumer
                    .fetch_watermarks(&topic, *partition, fetch_timeout)
                    .map_err(|e| LogError::ReplayFailed {
                        topic: topic.clone(),
                        reason: format!("failed to fetch watermarks: {e}"),
                    })?;
                if low < high {
                    ends.insert(*partition, high);
                    assignment
                        .add_partition_offset(&topic, *partition, Offset::Beginning)
                        .map_err(|e| LogError::ReplayFailed {
                            topic: topic.clone(),
                            reason: format!("failed to build assignment: {e}"),
                        })?;
                }
            }

            tracing::info!(
                topic = %topic,
                partitions = partitions.len(),
                non_empty = ends.len(),
                "replaying to captured high watermarks"
            );

            // Nothing to scan: the table starts empty.
            if ends.is_empty() {
                return Ok(Box::pin(futures::stream::empty()) as RecordStream);
            }

            consumer
                .assign(&assignment)
                .map_err(|e| LogError::ReplayFailed {
                    topic: topic.clone(),
                    reason: format!("failed to assign partitions: {e}"),
                })?;

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            tokio::spawn(async move {
                let mut remaining = ends;
                let mut last_seen: HashMap<i32, i64> = HashMap::new();
                let mut stream = consumer.stream();

                while !remaining.is_empty() {
                    let Some(next) = stream.next().await else {
                        // The broker stream ended with partitions still
                        // short of their watermark: the table must not be
                        // served from this partial scan.
                        if let Some((partition, expected)) = remaining.iter().next() {
                            let reached = last_seen.get(partition).copied().unwrap_or(-1);
                            let _ = tx
                                .send(Err(LogError::ReplayIncomplete {
                                    topic: topic.clone(),
                                    expected: *expected,
                                    reached,
                                }))
                                .await;
                        }
                        return;
                    };

                    match next {
                        Ok(message) => {
                            let partition = message.partition();
                            let offset = message.offset();
                            let result = to_log_record(&topic, &message);

                            if tx.send(result).await.is_err() {
                                return; // Receiver dropped mid-recovery.
                            }

                            last_seen.insert(partition, offset);
                            if let Some(end) = remaining.get(&partition) {
                                if offset + 1 >= *end {
                                    remaining.remove(&partition);
                                }
                            }
                        }
                        Err(e) => {
                            let err = LogError::Transport(format!("replay receive failed: {e}"));
                            if tx.send(Err(err)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                // All partitions reached their watermark; dropping tx
                // ends the stream.
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as RecordStream)
        })
    }
}

/// Convert one Kafka message into a [`LogRecord`].
///
/// A message without payload or without a key cannot be folded; both are
/// surfaced as errors for the consumer to count and drop.
fn to_log_record<M: Message>(topic: &str, message: &M) -> Result<LogRecord, LogError> {
    let Some(payload) = message.payload() else {
        return Err(LogError::MissingPayload {
            topic: topic.to_string(),
        });
    };
    let Some(key) = message.key() else {
        return Err(LogError::MissingKey {
            topic: topic.to_string(),
        });
    };
    Ok(LogRecord::new(
        String::from_utf8_lossy(key).into_owned(),
        payload.to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_log_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<KafkaLog>();
        assert_sync::<KafkaLog>();
    }

    #[test]
    fn builder_default_works() {
        let _builder = KafkaLog::builder();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = KafkaLog::builder().build();
        assert!(matches!(result, Err(LogError::ConnectionFailed(_))));
    }
}
