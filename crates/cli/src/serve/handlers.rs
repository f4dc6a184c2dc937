//! HTTP route handlers: health, ingest, positions, history, simulation.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fleetline_core::{Coordinates, FleetError};
use fleetline_engine::SubscriptionFilter;
use fleetline_storage::{HistoryQuery, NewSample, DEFAULT_HISTORY_LIMIT};
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

use super::state::AppState;
use super::{json_error, ApiError};

/// Default history window when `from` is omitted.
const DEFAULT_HISTORY_WINDOW: time::Duration = time::Duration::hours(24);

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.hub.active_sessions(),
        "simulation": state.supervisor.is_running(),
        "cache": state.cache_backend,
    });
    (StatusCode::OK, Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IngestRequest {
    vehicle_id: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    heading: Option<f64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    timestamp: Option<OffsetDateTime>,
}

/// POST /positions
pub(crate) async fn handle_ingest(
    State(state): State<Arc<AppState>>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return json_error(StatusCode::BAD_REQUEST, &rejection.body_text()).into_response()
        }
    };

    let now = state.clock.now();
    let sample = NewSample {
        vehicle_id: request.vehicle_id,
        coordinates: Coordinates {
            latitude: request.latitude,
            longitude: request.longitude,
        },
        speed: request.speed,
        heading: request.heading,
        timestamp: Some(request.timestamp.unwrap_or(now)),
    };
    let vehicle_id = sample.vehicle_id.clone();

    let recorded = match sample.check_not_future(now) {
        Ok(()) => state.store.record(sample).await,
        Err(e) => Err(e),
    };
    match recorded {
        Ok(stored) => {
            let response = serde_json::json!({
                "id": stored.id,
                "vehicleId": stored.vehicle_id,
                "timestamp": stored.timestamp.format(&Rfc3339).unwrap_or_default(),
            });
            (StatusCode::CREATED, Json(response)).into_response()
        }
        Err(e) => {
            warn!(vehicle_id = %vehicle_id, error = %e, "rejected position sample");
            ApiError::from(FleetError::from(e)).into_response()
        }
    }
}

/// GET /positions
pub(crate) async fn handle_all_positions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.hub.snapshot(&SubscriptionFilter::All).await)
}

/// GET /vehicles/{id}/position
pub(crate) async fn handle_vehicle_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let position = state.resolver.resolve(&id, state.clock.now()).await?;
    Ok(Json(position).into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryParams {
    from: Option<String>,
    to: Option<String>,
    limit: Option<usize>,
}

fn parse_instant(name: &str, raw: &str) -> Result<OffsetDateTime, FleetError> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|_| {
        FleetError::invalid_argument(format!("'{name}' must be an RFC 3339 timestamp, got '{raw}'"))
    })
}

/// GET /vehicles/{id}/history
pub(crate) async fn handle_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) =
        params.map_err(|rejection| FleetError::invalid_argument(rejection.body_text()))?;

    let to = match params.to.as_deref() {
        Some(raw) => parse_instant("to", raw)?,
        None => state.clock.now(),
    };
    let from = match params.from.as_deref() {
        Some(raw) => parse_instant("from", raw)?,
        None => to - DEFAULT_HISTORY_WINDOW,
    };
    let query = HistoryQuery::new(from, to, params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .map_err(FleetError::from)?;

    let samples = state
        .store
        .history(&id, &query)
        .await
        .map_err(FleetError::from)?;
    let response = serde_json::json!({
        "vehicleId": id,
        "samples": samples,
    });
    Ok(Json(response).into_response())
}

/// POST /vehicles/{id}/simulate-step
pub(crate) async fn handle_simulate_step(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let sample = state.resolver.simulate_step(&id, state.clock.now()).await?;
    Ok((StatusCode::CREATED, Json(sample)).into_response())
}

fn simulation_status(state: &AppState) -> serde_json::Value {
    serde_json::json!({
        "running": state.supervisor.is_running(),
        "tickMs": state.supervisor.tick().as_millis() as u64,
        "ticks": state.supervisor.ticks(),
    })
}

/// GET /simulation
pub(crate) async fn handle_simulation_status(
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(simulation_status(&state))
}

/// POST /simulation/start
pub(crate) async fn handle_simulation_start(
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let changed = state.supervisor.start();
    let mut body = simulation_status(&state);
    body["changed"] = serde_json::Value::Bool(changed);
    Json(body)
}

/// POST /simulation/stop
pub(crate) async fn handle_simulation_stop(
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let changed = state.supervisor.stop().await;
    let mut body = simulation_status(&state);
    body["changed"] = serde_json::Value::Bool(changed);
    Json(body)
}
