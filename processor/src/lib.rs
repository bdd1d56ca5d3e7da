//! # Keyfold Processor
//!
//! The stateful half of the keyfold pipeline: a [`Worker`] consumes one
//! assignment of partitions from the input topic, folds every event into
//! the per-key aggregate held in a [`ChangelogTable`], and keeps the
//! table durable through its changelog topic.
//!
//! ## Lifecycle
//!
//! 1. **Recover**: replay the changelog from the earliest offset to the
//!    high watermark, last-value-wins per key. No live event is served
//!    before recovery completes.
//! 2. **Consume**: stream input events in partition order, strictly
//!    sequentially: decode, fold against the table's prior state, write
//!    the new state durably, only then take the next event.
//! 3. **Shutdown**: stop between records when the shutdown signal flips;
//!    never mid-fold.
//!
//! ## Example
//!
//! ```ignore
//! use keyfold_processor::{ProcessorConfig, Worker};
//! use keyfold_core::record::WireFormat;
//!
//! let config = ProcessorConfig::new(
//!     "observations",
//!     "keyfold-group-table",
//!     "keyfold-group",
//!     WireFormat::Binary,
//! );
//! let (mut worker, shutdown) = Worker::new(log, config);
//!
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     shutdown.send(true).ok();
//! });
//!
//! worker.run().await?;
//! ```

pub mod table;
pub mod worker;

pub use table::ChangelogTable;
pub use worker::{ProcessorConfig, Worker, WorkerError};
