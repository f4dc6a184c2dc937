use std::future::Future;

use fleetline_core::Coordinates;
use time::OffsetDateTime;

use super::{make_sample, TestResult};
use crate::record::NewSample;
use crate::{PositionStore, StorageError};

pub(super) async fn run_ingest_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "ingest",
        "record_returns_stored_sample",
        record_returns_stored_sample(factory).await,
    ));
    results.push(TestResult::from_result(
        "ingest",
        "record_assigns_distinct_ids",
        record_assigns_distinct_ids(factory).await,
    ));
    results.push(TestResult::from_result(
        "ingest",
        "record_defaults_timestamp_to_now",
        record_defaults_timestamp_to_now(factory).await,
    ));
    results.push(TestResult::from_result(
        "ingest",
        "record_rejects_latitude_out_of_range",
        record_rejects_coordinates(factory, 95.0, 0.0).await,
    ));
    results.push(TestResult::from_result(
        "ingest",
        "record_rejects_longitude_out_of_range",
        record_rejects_coordinates(factory, 0.0, 200.0).await,
    ));
    results.push(TestResult::from_result(
        "ingest",
        "record_rejects_negative_speed",
        record_rejects_negative_speed(factory).await,
    ));

    results
}

// ── 1. record echoes what was stored ─────────────────────────────────────────

async fn record_returns_stored_sample<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let input = make_sample("bus-1", 0);
    let stored = s
        .record(input.clone())
        .await
        .map_err(|e| format!("record: {e}"))?;

    if stored.vehicle_id != "bus-1" {
        return Err(format!("vehicle_id mismatch: {}", stored.vehicle_id));
    }
    if stored.coordinates != input.coordinates {
        return Err(format!("coordinates mismatch: {:?}", stored.coordinates));
    }
    if Some(stored.timestamp) != input.timestamp {
        return Err(format!("timestamp mismatch: {}", stored.timestamp));
    }
    if stored.speed != Some(25.0) || stored.heading != Some(90.0) {
        return Err(format!(
            "speed/heading mismatch: {:?}/{:?}",
            stored.speed, stored.heading
        ));
    }
    Ok(())
}

// ── 2. ids are distinct ──────────────────────────────────────────────────────

async fn record_assigns_distinct_ids<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let a = s
        .record(make_sample("bus-1", 0))
        .await
        .map_err(|e| format!("record a: {e}"))?;
    let b = s
        .record(make_sample("bus-1", 0))
        .await
        .map_err(|e| format!("record b: {e}"))?;
    if a.id == b.id {
        return Err(format!("duplicate sample id {}", a.id));
    }
    Ok(())
}

// ── 3. missing timestamp is stamped by the store ─────────────────────────────

async fn record_defaults_timestamp_to_now<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let before = OffsetDateTime::now_utc();
    let mut input = make_sample("bus-1", 0);
    input.timestamp = None;
    let stored = s.record(input).await.map_err(|e| format!("record: {e}"))?;
    let after = OffsetDateTime::now_utc();

    if stored.timestamp < before || stored.timestamp > after {
        return Err(format!(
            "timestamp {} not within [{before}, {after}]",
            stored.timestamp
        ));
    }
    Ok(())
}

// ── 4. out-of-range coordinates are rejected and nothing is stored ───────────

async fn record_rejects_coordinates<S, F, Fut>(
    factory: &F,
    latitude: f64,
    longitude: f64,
) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let input = NewSample::new(
        "bus-1",
        Coordinates {
            latitude,
            longitude,
        },
    );
    match s.record(input).await {
        Err(StorageError::InvalidCoordinates { .. }) => {}
        other => return Err(format!("expected InvalidCoordinates, got {:?}", other)),
    }
    match s.latest("bus-1").await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("rejected sample was stored: {:?}", other)),
    }
}

// ── 5. negative speed is an invalid argument ────────────────────────────────

async fn record_rejects_negative_speed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let input = make_sample("bus-1", 0).with_speed(-3.0);
    match s.record(input).await {
        Err(StorageError::InvalidArgument(_)) => {}
        other => return Err(format!("expected InvalidArgument, got {:?}", other)),
    }
    match s.latest("bus-1").await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("rejected sample was stored: {:?}", other)),
    }
}
