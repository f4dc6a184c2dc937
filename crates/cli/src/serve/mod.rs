//! `fleetline serve` -- HTTP API and live stream for the position engine.
//!
//! Security features:
//! - CORS headers on all responses (permissive for local dev)
//! - Per-IP rate limiting (`server.rate_limit` requests per minute)
//! - Request body size cap
//!
//! Endpoints:
//! - GET  /health                         - Server status
//! - POST /positions                      - Ingest one position sample
//! - GET  /positions                      - Resolved positions of every active vehicle
//! - GET  /vehicles/{id}/position         - Resolved position of one vehicle
//! - GET  /vehicles/{id}/history          - Stored samples in a time window
//! - POST /vehicles/{id}/simulate-step    - Persist one simulated sample
//! - GET  /stream                         - SSE snapshot feed (vehicleId | tripId, intervalMs)
//! - GET  /stream/sessions                - Open streaming sessions
//! - GET  /simulation                     - Background simulation status
//! - POST /simulation/start               - Start the background simulation
//! - POST /simulation/stop                - Stop the background simulation
//!
//! All responses except `/stream` use Content-Type: application/json.

mod handlers;
mod middleware;
mod state;
mod stream;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use fleetline_core::FleetError;
use fleetline_engine::{
    connect_cache, Clock, DistributionHub, FleetDirectory, JsonDirectory, PositionResolver,
    SimulationSupervisor, SystemClock,
};
use fleetline_storage::{MemoryPositionStore, PositionStore};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;

use self::handlers::{
    handle_all_positions, handle_health, handle_history, handle_ingest, handle_not_found,
    handle_simulate_step, handle_simulation_start, handle_simulation_status,
    handle_simulation_stop, handle_vehicle_position,
};
use self::middleware::rate_limit_middleware;
use self::state::{AppState, RateLimiter};
use self::stream::{handle_sessions, handle_stream};

/// Maximum request body size: 64 KB. Ingest bodies are a few hundred bytes.
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Rate limit window duration in seconds (1 minute).
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

/// A [`FleetError`] rendered as a JSON error response.
#[derive(Debug)]
pub(crate) struct ApiError(FleetError);

impl From<FleetError> for ApiError {
    fn from(error: FleetError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            FleetError::InvalidCoordinates { .. } | FleetError::InvalidArgument(_) => {
                StatusCode::BAD_REQUEST
            }
            FleetError::InvalidRoute(_) => StatusCode::UNPROCESSABLE_ENTITY,
            FleetError::NotFound(_) => StatusCode::NOT_FOUND,
            FleetError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        json_error(status, &self.0.to_string()).into_response()
    }
}

/// Load the fleet document, or start with an empty directory.
pub(crate) fn load_directory(fleet: Option<&PathBuf>) -> Result<JsonDirectory, FleetError> {
    match fleet {
        Some(path) => {
            let directory = JsonDirectory::from_path(path)?;
            info!(
                path = %path.display(),
                vehicles = directory.vehicle_count(),
                "loaded fleet document"
            );
            Ok(directory)
        }
        None => {
            warn!("no fleet document given; only ingested samples will resolve");
            Ok(JsonDirectory::default())
        }
    }
}

/// Wire store, directory, cache and resolver together from configuration.
pub(crate) async fn build_resolver(
    config: &Config,
    store: Arc<dyn PositionStore>,
    directory: Arc<dyn FleetDirectory>,
) -> Result<PositionResolver, Box<dyn std::error::Error>> {
    let cache = connect_cache(&config.cache).await;
    info!(backend = cache.backend(), "lookup cache ready");
    Ok(PositionResolver::new(
        store,
        directory,
        cache,
        config.simulator(),
        config.resolver_config()?,
    ))
}

/// Start the HTTP server.
///
/// When TLS cert/key paths are provided, the server listens over HTTPS
/// using `axum-server` with rustls. Otherwise it uses plain HTTP.
pub async fn start_server(
    config: &Config,
    fleet: Option<PathBuf>,
    _tls_cert: Option<PathBuf>,
    _tls_key: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    let directory: Arc<dyn FleetDirectory> = Arc::new(load_directory(fleet.as_ref())?);
    let store: Arc<dyn PositionStore> = Arc::new(MemoryPositionStore::new());
    let resolver = Arc::new(build_resolver(config, store.clone(), directory).await?);
    let cache_backend = resolver.cache().backend();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let hub = DistributionHub::new(resolver.clone(), clock.clone(), config.hub_config());
    let supervisor = Arc::new(SimulationSupervisor::new(
        resolver.clone(),
        clock.clone(),
        config.simulation_tick(),
    ));
    if config.simulation.autostart {
        supervisor.start();
    }

    info!(
        rate_limit = config.server.rate_limit,
        "rate limit: requests per minute per IP"
    );

    let state = Arc::new(AppState {
        store,
        resolver,
        hub: hub.clone(),
        supervisor: supervisor.clone(),
        clock,
        rate_limiter: RateLimiter::new(config.server.rate_limit),
        cache_backend,
    });

    // CORS: permissive for local dev
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/positions", get(handle_all_positions).post(handle_ingest))
        .route("/vehicles/{id}/position", get(handle_vehicle_position))
        .route("/vehicles/{id}/history", get(handle_history))
        .route("/vehicles/{id}/simulate-step", post(handle_simulate_step))
        .route("/stream", get(handle_stream))
        .route("/stream/sessions", get(handle_sessions))
        .route("/simulation", get(handle_simulation_status))
        .route("/simulation/start", post(handle_simulation_start))
        .route("/simulation/stop", post(handle_simulation_stop))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state);

    let port = config.server.port;
    let addr = format!("0.0.0.0:{}", port);

    // TLS support via axum-server + rustls (requires `tls` feature)
    #[cfg(feature = "tls")]
    if let (Some(cert_path), Some(key_path)) = (&_tls_cert, &_tls_key) {
        let tls =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
        let socket_addr: std::net::SocketAddr = addr.parse()?;
        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        let shutdown_hub = hub.clone();
        tokio::spawn(async move {
            shutdown_signal(shutdown_hub).await;
            shutdown_handle.graceful_shutdown(Some(std::time::Duration::from_secs(5)));
        });
        info!("fleetline listening on https://0.0.0.0:{}", port);
        axum_server::bind_rustls(socket_addr, tls)
            .handle(handle)
            .serve(app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .await?;
        supervisor.stop().await;
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("fleetline listening on http://0.0.0.0:{}", port);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(hub))
    .await?;

    supervisor.stop().await;
    info!("server shut down");
    Ok(())
}

/// Wait for Ctrl+C, then end every open stream so connections can drain.
async fn shutdown_signal(hub: DistributionHub) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
    hub.shutdown();
}
