//! End-to-end pipeline tests over the in-memory log.
//!
//! Exercise the full path the production wiring uses: emitter publishes
//! keyed events, the worker folds them into the changelog-backed table,
//! the view replica follows the changelog, and lookups serve the result.

#![allow(clippy::unwrap_used)] // Test code uses unwrap for clear failure messages

use keyfold_core::emitter::Emitter;
use keyfold_core::record::{Event, WireFormat};
use keyfold_core::KeyedTable;
use keyfold_processor::{ProcessorConfig, Worker};
use keyfold_testing::{InMemoryLog, state};
use keyfold_view::{TableReplica, ViewConfig};
use std::sync::Arc;
use tokio::sync::watch;

const INPUT: &str = "observations";
const CHANGELOG: &str = "keyfold-group-table";

fn event(observed_at: &str, amount: i32) -> Event {
    Event {
        observed_at: observed_at.to_string(),
        amount,
    }
}

/// Emit `events`, run the worker over them, then bring a view replica up
/// to date with the changelog.
async fn run_pipeline(events: &[(&str, Event)], format: WireFormat) -> TableReplica {
    let log = Arc::new(InMemoryLog::new());

    let emitter = Emitter::new(log.clone(), INPUT, format);
    for (key, ev) in events {
        emitter.emit(key, ev).await.unwrap();
    }

    let config = ProcessorConfig::new(INPUT, CHANGELOG, "keyfold-group", format);
    let (mut worker, shutdown) = Worker::new(log.clone(), config);
    shutdown.send(true).unwrap();
    worker.run().await.unwrap();

    let replica = TableReplica::new();
    let (view_shutdown_tx, view_shutdown_rx) = watch::channel(false);
    view_shutdown_tx.send(true).unwrap();
    let view_config = ViewConfig::new(CHANGELOG, "keyfold-view", format);
    replica
        .follow(log, &view_config, view_shutdown_rx)
        .await
        .unwrap();
    replica
}

#[tokio::test]
async fn two_events_one_key_serve_the_folded_aggregate() {
    let replica = run_pipeline(
        &[("3", event("T1", 2)), ("3", event("T2", 5))],
        WireFormat::Binary,
    )
    .await;

    assert_eq!(replica.lookup("3").await, Some(state("T1", "T2", 7)));
    assert_eq!(replica.lookup("9").await, None);
}

#[tokio::test]
async fn pipeline_works_identically_over_json() {
    let replica = run_pipeline(
        &[("3", event("T1", 2)), ("3", event("T2", 5))],
        WireFormat::Json,
    )
    .await;

    assert_eq!(replica.lookup("3").await, Some(state("T1", "T2", 7)));
}

#[tokio::test]
async fn keys_are_served_independently() {
    let replica = run_pipeline(
        &[
            ("0", event("T1", 4)),
            ("1", event("T2", 9)),
            ("0", event("T3", 4)),
        ],
        WireFormat::Binary,
    )
    .await;

    assert_eq!(replica.lookup("0").await, Some(state("T1", "T3", 8)));
    assert_eq!(replica.lookup("1").await, Some(state("T2", "T2", 9)));
}

#[tokio::test]
async fn restarted_worker_resumes_from_recovered_state() {
    let log = Arc::new(InMemoryLog::new());
    let format = WireFormat::Binary;
    let emitter = Emitter::new(log.clone(), INPUT, format);
    let config = ProcessorConfig::new(INPUT, CHANGELOG, "keyfold-group", format);

    // First worker folds one event, then "crashes" (is dropped).
    emitter.emit("3", &event("T1", 2)).await.unwrap();
    let (mut first, shutdown) = Worker::new(log.clone(), config.clone());
    shutdown.send(true).unwrap();
    first.run().await.unwrap();
    drop(first);

    // Second worker rebuilds the table from the changelog alone; the
    // recovered aggregate must carry the original first_seen_at.
    let (mut second, _shutdown) = Worker::new(log.clone(), config);
    second.recover().await.unwrap();
    assert_eq!(
        second.table().get("3").await.unwrap(),
        Some(state("T1", "T1", 2))
    );
}
