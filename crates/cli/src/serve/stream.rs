//! GET /stream -- Server-Sent Events feed of resolved positions.
//!
//! Each connection owns one hub session. The first `snapshot` event is
//! sent immediately, then one per interval. When the viewer disconnects
//! axum drops the body stream, which drops the subscription and stops the
//! session timer.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use fleetline_core::FleetError;
use fleetline_engine::SubscriptionFilter;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::warn;

use super::state::AppState;
use super::ApiError;

/// SSE event name carrying a snapshot.
pub(crate) const SNAPSHOT_EVENT: &str = "snapshot";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StreamParams {
    vehicle_id: Option<String>,
    trip_id: Option<String>,
    interval_ms: Option<u64>,
}

pub(crate) async fn handle_stream(
    State(state): State<Arc<AppState>>,
    params: Result<Query<StreamParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) =
        params.map_err(|rejection| FleetError::invalid_argument(rejection.body_text()))?;
    let filter = SubscriptionFilter::from_params(params.vehicle_id, params.trip_id)?;
    let subscription = state.hub.open(filter, params.interval_ms)?;

    let events = subscription.into_stream().filter_map(|snapshot| async move {
        match Event::default().event(SNAPSHOT_EVENT).json_data(&snapshot) {
            Ok(event) => Some(Ok::<_, Infallible>(event)),
            Err(e) => {
                warn!(error = %e, "snapshot could not be encoded");
                None
            }
        }
    });

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// GET /stream/sessions
pub(crate) async fn handle_sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.hub.sessions())
}
