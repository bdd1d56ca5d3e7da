//! # Keyfold View
//!
//! The read side of the keyfold pipeline: a [`TableReplica`] follows the
//! processor's changelog topic and an axum server exposes point lookups
//! of the latest aggregate per key.
//!
//! The replica is decoupled in time from the writer. Lookups see a
//! snapshot "as of some recent fold": eventually consistent, no
//! read-your-writes guarantee, no staleness bound. A key that has never
//! been folded yields an empty result, never an error.
//!
//! ## Endpoints
//!
//! - `GET /aggregates/{key}`: the JSON-encoded [`AggregateState`] for the
//!   key, or JSON `null` when absent
//! - `GET /health`: liveness probe
//!
//! ## Example
//!
//! ```ignore
//! let replica = TableReplica::new();
//! let config = ViewConfig::new("keyfold-group-table", "keyfold-view", WireFormat::Binary);
//!
//! // Follow the changelog in the background.
//! let follower = replica.clone();
//! tokio::spawn(async move { follower.follow(log, &config, shutdown_rx).await });
//!
//! // Serve lookups.
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:9095").await?;
//! axum::serve(listener, router(replica)).await?;
//! ```
//!
//! [`AggregateState`]: keyfold_core::record::AggregateState

pub mod error;
pub mod replica;
pub mod server;

pub use error::ViewError;
pub use replica::{TableReplica, ViewConfig};
pub use server::router;
