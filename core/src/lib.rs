//! # Keyfold Core
//!
//! Core types and traits for the keyfold stream-aggregation pipeline.
//!
//! Keyfold is a minimal stateful pipeline over a partitioned, ordered log:
//! an emitter publishes keyed events, a processor folds each partition's
//! events into a per-key aggregate held in a changelog-backed keyed table,
//! and a read-only view serves point lookups of the latest aggregate.
//!
//! This crate holds everything that is independent of a concrete log or
//! serving backend:
//!
//! - [`record`]: the [`Event`](record::Event) and
//!   [`AggregateState`](record::AggregateState) wire records and their
//!   encode/decode contract
//! - [`fold`]: the pure merge function combining prior state with an
//!   incoming event
//! - [`log`]: the [`EventLog`](log::EventLog) trait abstracting the
//!   partitioned log substrate (Kafka in production, in-memory in tests)
//! - [`table`]: the [`KeyedTable`](table::KeyedTable) trait for the
//!   durable per-key state store
//! - [`emitter`]: the producer-side helper that encodes and publishes
//!   events
//!
//! ## Data flow
//!
//! ```text
//! ┌─────────┐        ┌──────────────┐        ┌───────────────┐
//! │ Emitter │──────▶ │  Event Log   │──────▶ │   Processor   │
//! └─────────┘  emit  │ (partitioned)│ consume│  fold + set   │
//!                    └──────────────┘        └──────┬────────┘
//!                           ▲                       │
//!                           │ changelog writes      │
//!                    ┌──────┴────────┐              ▼
//!                    │   Changelog   │◀───── ┌─────────────┐
//!                    └──────┬────────┘       │ Keyed Table │
//!                           │ follow         └─────────────┘
//!                           ▼
//!                    ┌──────────────┐
//!                    │ View Replica │──▶ GET /aggregates/{key}
//!                    └──────────────┘
//! ```
//!
//! ## Ordering model
//!
//! Events for one key always land on one partition (the log's stable key
//! hashing) and are folded strictly sequentially by the partition's owning
//! worker. There is no ordering guarantee across partitions.

pub mod emitter;
pub mod fold;
pub mod log;
pub mod record;
pub mod table;

pub use emitter::{EmitError, Emitter};
pub use fold::{FoldError, fold};
pub use log::{EventLog, LogError, LogRecord, RecordStream};
pub use record::{AggregateState, DecodeError, EncodeError, Event, WireFormat, WireRecord};
pub use table::{KeyedTable, TableError};
