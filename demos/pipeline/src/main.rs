//! Runnable keyfold pipeline against a live Kafka-compatible broker.
//!
//! Wires all three roles into one process:
//! - an emitter publishing one keyed event every 5 seconds (keys cycle
//!   through "0".."5", amounts through 0..9)
//! - a processor worker folding events into the changelog-backed table
//! - a view following the changelog and serving lookups on port 9095
//!
//! Try it:
//!
//! ```text
//! KEYFOLD_BROKERS=127.0.0.1:9092 cargo run --bin keyfold-pipeline
//! curl http://localhost:9095/aggregates/3
//! ```

use anyhow::Result;
use chrono::Utc;
use keyfold_core::emitter::Emitter;
use keyfold_core::log::EventLog;
use keyfold_core::record::{Event, WireFormat};
use keyfold_kafka::{KafkaLog, TopicSpec, ensure_topics};
use keyfold_processor::{ProcessorConfig, Worker};
use keyfold_view::{TableReplica, ViewConfig, router};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, interval};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const INPUT_TOPIC: &str = "keyfold-observations";
const GROUP: &str = "keyfold-demo";
const CHANGELOG_TOPIC: &str = "keyfold-demo-table";
const VIEW_GROUP: &str = "keyfold-demo-view";
const FORMAT: WireFormat = WireFormat::Binary;
const PARTITIONS: i32 = 8;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let brokers =
        std::env::var("KEYFOLD_BROKERS").unwrap_or_else(|_| "127.0.0.1:9092".to_string());

    info!(brokers = %brokers, "provisioning topics");
    ensure_topics(
        &brokers,
        &[
            TopicSpec::new(INPUT_TOPIC, PARTITIONS, 1),
            TopicSpec::new(CHANGELOG_TOPIC, PARTITIONS, 1),
        ],
    )
    .await?;

    let log: Arc<dyn EventLog> = Arc::new(
        KafkaLog::builder()
            .brokers(&brokers)
            .producer_acks("all")
            .auto_offset_reset("earliest")
            .build()?,
    );

    // Emitter: one event every 5 seconds, keys cycling through six users.
    let emitter = Emitter::new(log.clone(), INPUT_TOPIC, FORMAT);
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(5));
        let mut i: i32 = 0;
        loop {
            ticker.tick().await;
            let key = (i % 6).to_string();
            let event = Event {
                observed_at: Utc::now().to_rfc3339(),
                amount: i % 10,
            };
            match emitter.emit(&key, &event).await {
                Ok(()) => info!(key = %key, amount = event.amount, "event emitted"),
                Err(e) => error!(error = %e, "emit failed"),
            }
            i = i.wrapping_add(1);
        }
    });

    // Processor: recover the table, then fold live events.
    let config = ProcessorConfig::new(INPUT_TOPIC, CHANGELOG_TOPIC, GROUP, FORMAT);
    let (mut worker, worker_shutdown) = Worker::new(log.clone(), config);
    tokio::spawn(async move {
        if let Err(e) = worker.run().await {
            error!(error = %e, "worker stopped with error");
        }
    });

    // View: follow the changelog and serve lookups.
    let replica = TableReplica::new();
    let view_config = ViewConfig::new(CHANGELOG_TOPIC, VIEW_GROUP, FORMAT);
    let (view_shutdown_tx, view_shutdown_rx) = watch::channel(false);
    let follower = replica.clone();
    let follower_log = log.clone();
    tokio::spawn(async move {
        if let Err(e) = follower
            .follow(follower_log, &view_config, view_shutdown_rx)
            .await
        {
            error!(error = %e, "view follower stopped with error");
        }
    });

    let listener = tokio::net::TcpListener::bind("0.0.0.0:9095").await?;
    info!("view listening on http://localhost:9095/aggregates/{{key}}");

    axum::serve(listener, router(replica))
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
            worker_shutdown.send(true).ok();
            view_shutdown_tx.send(true).ok();
        })
        .await?;

    Ok(())
}
