//! HTTP serving of point lookups over the table replica.
//!
//! One read operation, unauthenticated: `GET /aggregates/{key}` returns
//! the JSON aggregate for the key, or JSON `null` when the key has never
//! been folded. Absence is an empty result at the boundary, not an
//! error status.

use crate::replica::TableReplica;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use keyfold_core::record::AggregateState;
use tower_http::trace::TraceLayer;

/// Build the view router over a replica.
///
/// The handlers hold a clone of the replica and never mutate it; the
/// follower task updates the shared map underneath.
pub fn router(replica: TableReplica) -> Router {
    Router::new()
        .route("/aggregates/:key", get(lookup_aggregate))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(replica)
}

/// `GET /aggregates/{key}`: latest aggregate for the key, as of some
/// recent fold, or `null` when absent.
async fn lookup_aggregate(
    State(replica): State<TableReplica>,
    Path(key): Path<String>,
) -> Json<Option<AggregateState>> {
    let state = replica.lookup(&key).await;
    tracing::debug!(key = %key, found = state.is_some(), "lookup served");
    Json(state)
}

/// `GET /health`: liveness probe. Does not check the follower's lag.
#[allow(clippy::unused_async)]
async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
