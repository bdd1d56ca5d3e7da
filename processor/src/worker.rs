//! The partition worker: recovery replay plus the live fold loop.

use crate::table::ChangelogTable;
use futures::StreamExt;
use keyfold_core::fold::{FoldError, fold};
use keyfold_core::log::{EventLog, LogError, LogRecord};
use keyfold_core::record::{AggregateState, DecodeError, Event, WireFormat, WireRecord};
use keyfold_core::table::{KeyedTable, TableError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Everything a worker needs to know, passed explicitly at construction.
///
/// There is no process-global configuration: two workers with different
/// configs can coexist in one process (as the tests do).
#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    /// Topic carrying the input events.
    pub input_topic: String,
    /// Topic carrying the table's changelog.
    pub changelog_topic: String,
    /// Consumer group for the input subscription. Determines which
    /// partitions this worker is assigned.
    pub group: String,
    /// Wire format shared by the input topic and the changelog. Must
    /// match the producer's format; a mismatch surfaces as decode
    /// failures, never as silently wrong aggregates.
    pub format: WireFormat,
}

impl ProcessorConfig {
    /// Bundle the four knobs into a config.
    #[must_use]
    pub fn new(
        input_topic: impl Into<String>,
        changelog_topic: impl Into<String>,
        group: impl Into<String>,
        format: WireFormat,
    ) -> Self {
        Self {
            input_topic: input_topic.into(),
            changelog_topic: changelog_topic.into(),
            group: group.into(),
            format,
        }
    }
}

/// Fatal worker failures. Any of these stops the owning worker without
/// affecting workers on other partitions.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The log substrate failed (subscription, replay start, or an
    /// incomplete recovery scan).
    #[error(transparent)]
    Log(#[from] LogError),

    /// A changelog record could not be decoded during recovery. Recovery
    /// halts rather than skips: dropping a snapshot would silently
    /// corrupt the rebuilt totals.
    #[error("recovery halted: {0}")]
    ChangelogDecode(#[from] DecodeError),

    /// The table handed the fold a state that violates its invariants.
    #[error(transparent)]
    Integrity(#[from] FoldError),

    /// A durable table write failed; the partition must not continue
    /// past an uncommitted fold.
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Stateful consumer for one assignment of input partitions.
///
/// Created together with a shutdown handle, mirroring the lifecycle of
/// the surrounding process: send `true` on the returned
/// [`watch::Sender`] to stop the worker between records.
pub struct Worker {
    log: Arc<dyn EventLog>,
    config: ProcessorConfig,
    table: ChangelogTable,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    /// Create a worker and its shutdown handle.
    ///
    /// The worker builds its own [`ChangelogTable`] on `log` from the
    /// config's changelog topic and wire format.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>, config: ProcessorConfig) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let table = ChangelogTable::new(log.clone(), config.changelog_topic.clone(), config.format);

        let worker = Self {
            log,
            config,
            table,
            shutdown: shutdown_rx,
        };
        (worker, shutdown_tx)
    }

    /// Read access to the table, for queries and assertions.
    #[must_use]
    pub const fn table(&self) -> &ChangelogTable {
        &self.table
    }

    /// Recover the table, then consume live events until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] on any fatal condition: an incomplete or
    /// undecodable changelog replay, a failed subscription, a corrupt
    /// prior state, or an unacknowledged table write.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        self.recover().await?;

        tracing::info!(
            topic = %self.config.input_topic,
            group = %self.config.group,
            "worker consuming live events"
        );

        let mut events = self
            .log
            .subscribe(&self.config.input_topic, &self.config.group)
            .await?;

        loop {
            tokio::select! {
                // Drain ready records before honoring shutdown, so a stop
                // signal never abandons events already delivered.
                biased;

                Some(next) = events.next() => {
                    match next {
                        Ok(record) => self.apply(&record).await?,
                        Err(e) => {
                            // Transport hiccups are the substrate's to
                            // retry; nothing was folded.
                            tracing::error!(error = %e, "input stream error");
                        }
                    }
                }

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }

                else => break,
            }
        }

        tracing::info!(group = %self.config.group, "worker stopped");
        Ok(())
    }

    /// Rebuild the table from the changelog, last-value-wins per key.
    ///
    /// Must complete before any live event is folded. The replay stream
    /// is bounded at the high watermark captured when it starts; an
    /// early end surfaces as [`LogError::ReplayIncomplete`] and is
    /// fatal.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::ChangelogDecode`] on the first malformed
    /// changelog record (no skipping) or [`WorkerError::Log`] if the
    /// scan fails or ends early.
    pub async fn recover(&mut self) -> Result<u64, WorkerError> {
        tracing::info!(
            changelog = %self.config.changelog_topic,
            "recovering table from changelog"
        );

        let mut records = self.log.replay(&self.config.changelog_topic).await?;
        let mut restored: u64 = 0;

        while let Some(next) = records.next().await {
            let record = next?;
            let state = AggregateState::decode(&record.payload, self.config.format)?;
            self.table.restore(&record.key, state).await;
            restored += 1;
        }

        metrics::counter!("processor.records_recovered").increment(restored);
        let keys = self.table.len().await;
        tracing::info!(
            changelog = %self.config.changelog_topic,
            records = restored,
            keys = keys,
            "recovery complete"
        );
        Ok(restored)
    }

    /// Fold one input record into the table.
    ///
    /// Strictly sequential per worker: the durable table write completes
    /// before the caller takes the next record. A malformed input event
    /// is logged and dropped; it was never folded, so the table stays
    /// consistent.
    async fn apply(&self, record: &LogRecord) -> Result<(), WorkerError> {
        let event = match Event::decode(&record.payload, self.config.format) {
            Ok(event) => event,
            Err(e) => {
                metrics::counter!("processor.events_dropped").increment(1);
                tracing::error!(
                    key = %record.key,
                    error = %e,
                    "dropping undecodable input event"
                );
                return Ok(());
            }
        };

        let prior = self.table.get(&record.key).await?;
        let next = fold(prior.as_ref(), &event)?;

        tracing::debug!(
            key = %record.key,
            amount = event.amount,
            total = next.total,
            "event folded"
        );

        self.table.set(&record.key, next).await?;
        metrics::counter!("processor.events_folded").increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use keyfold_core::emitter::Emitter;
    use keyfold_core::record::AggregateState;
    use keyfold_testing::{InMemoryLog, event, state};

    const FORMAT: WireFormat = WireFormat::Binary;

    fn config() -> ProcessorConfig {
        ProcessorConfig::new("observations", "group-table", "group", FORMAT)
    }

    async fn emit_all(log: &Arc<InMemoryLog>, events: &[(&str, Event)]) {
        let emitter = Emitter::new(log.clone(), "observations", FORMAT);
        for (key, event) in events {
            emitter.emit(key, event).await.unwrap();
        }
    }

    /// Run a worker over whatever is already on the input topic, then
    /// shut it down once the backlog is drained.
    async fn run_worker(worker: &mut Worker, shutdown: watch::Sender<bool>) {
        shutdown.send(true).unwrap();
        worker.run().await.unwrap();
    }

    #[tokio::test]
    async fn folds_events_in_order_and_writes_changelog() {
        let log = Arc::new(InMemoryLog::new());
        emit_all(&log, &[("3", event("T1", 2)), ("3", event("T2", 5))]).await;

        let (mut worker, shutdown) = Worker::new(log.clone(), config());
        run_worker(&mut worker, shutdown).await;

        assert_eq!(
            worker.table().get("3").await.unwrap(),
            Some(state("T1", "T2", 7))
        );
        // One changelog snapshot per fold.
        assert_eq!(log.len("group-table"), 2);
    }

    #[tokio::test]
    async fn keys_accumulate_independently() {
        let log = Arc::new(InMemoryLog::new());
        emit_all(
            &log,
            &[
                ("a", event("T1", 1)),
                ("b", event("T2", 10)),
                ("a", event("T3", -4)),
            ],
        )
        .await;

        let (mut worker, shutdown) = Worker::new(log.clone(), config());
        run_worker(&mut worker, shutdown).await;

        assert_eq!(
            worker.table().get("a").await.unwrap(),
            Some(state("T1", "T3", -3))
        );
        assert_eq!(
            worker.table().get("b").await.unwrap(),
            Some(state("T2", "T2", 10))
        );
        assert_eq!(worker.table().get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn undecodable_input_event_is_dropped_not_fatal() {
        let log = Arc::new(InMemoryLog::new());
        log.publish(
            "observations",
            LogRecord::new("3".to_string(), b"not an event".to_vec()),
        )
        .await
        .unwrap();
        emit_all(&log, &[("3", event("T1", 2))]).await;

        let (mut worker, shutdown) = Worker::new(log.clone(), config());
        run_worker(&mut worker, shutdown).await;

        // The malformed record was skipped; the good one folded.
        assert_eq!(
            worker.table().get("3").await.unwrap(),
            Some(state("T1", "T1", 2))
        );
    }

    #[tokio::test]
    async fn recovery_rebuilds_last_value_per_key() {
        let log = Arc::new(InMemoryLog::new());

        // Changelog with two snapshots for "3": only the later one must
        // survive.
        for snapshot in [state("T1", "T1", 2), state("T1", "T2", 7)] {
            log.publish(
                "group-table",
                LogRecord::new("3".to_string(), snapshot.encode(FORMAT).unwrap()),
            )
            .await
            .unwrap();
        }

        let (mut worker, _shutdown) = Worker::new(log.clone(), config());
        let restored = worker.recover().await.unwrap();

        assert_eq!(restored, 2);
        assert_eq!(
            worker.table().get("3").await.unwrap(),
            Some(state("T1", "T2", 7))
        );
    }

    #[tokio::test]
    async fn recovery_is_idempotent() {
        let log = Arc::new(InMemoryLog::new());
        emit_all(&log, &[("3", event("T1", 2)), ("3", event("T2", 5))]).await;

        let (mut worker, shutdown) = Worker::new(log.clone(), config());
        run_worker(&mut worker, shutdown).await;

        // Replay the same changelog into a fresh worker, twice.
        let (mut second, _shutdown) = Worker::new(log.clone(), config());
        second.recover().await.unwrap();
        let after_once = second.table().get("3").await.unwrap();
        second.recover().await.unwrap();
        let after_twice = second.table().get("3").await.unwrap();

        assert_eq!(after_once, Some(state("T1", "T2", 7)));
        assert_eq!(after_once, after_twice);
    }

    #[tokio::test]
    async fn recovery_halts_on_malformed_changelog_record() {
        let log = Arc::new(InMemoryLog::new());
        log.publish(
            "group-table",
            LogRecord::new("3".to_string(), b"garbage".to_vec()),
        )
        .await
        .unwrap();

        let (mut worker, _shutdown) = Worker::new(log.clone(), config());
        let result = worker.recover().await;

        assert!(matches!(result, Err(WorkerError::ChangelogDecode(_))));
        assert!(worker.table().is_empty().await);
    }

    #[tokio::test]
    async fn corrupt_prior_state_is_fatal() {
        let log = Arc::new(InMemoryLog::new());

        // A changelog snapshot with an empty first_seen_at: something
        // other than the fold wrote this.
        let corrupt = AggregateState {
            first_seen_at: String::new(),
            last_seen_at: "T0".to_string(),
            total: 1,
        };
        log.publish(
            "group-table",
            LogRecord::new("3".to_string(), corrupt.encode(FORMAT).unwrap()),
        )
        .await
        .unwrap();
        emit_all(&log, &[("3", event("T1", 2))]).await;

        let (mut worker, shutdown) = Worker::new(log.clone(), config());
        shutdown.send(true).unwrap();
        let result = worker.run().await;

        assert!(matches!(result, Err(WorkerError::Integrity(_))));
    }

    #[tokio::test]
    async fn format_mismatch_surfaces_as_decode_failure() {
        let log = Arc::new(InMemoryLog::new());

        // Emitter writes JSON; worker expects binary. The event must be
        // dropped, never folded into a wrong aggregate.
        let emitter = Emitter::new(log.clone(), "observations", WireFormat::Json);
        emitter.emit("3", &event("T1", 2)).await.unwrap();

        let (mut worker, shutdown) = Worker::new(log.clone(), config());
        run_worker(&mut worker, shutdown).await;

        assert_eq!(worker.table().get("3").await.unwrap(), None);
    }
}
