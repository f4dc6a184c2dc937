use std::future::Future;

use super::{make_sample, TestResult};
use crate::{PositionStore, StorageError};

pub(super) async fn run_latest_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "latest",
        "latest_unknown_vehicle_not_found",
        latest_unknown_vehicle_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "latest",
        "latest_ignores_insertion_order",
        latest_ignores_insertion_order(factory).await,
    ));
    results.push(TestResult::from_result(
        "latest",
        "latest_is_scoped_per_vehicle",
        latest_is_scoped_per_vehicle(factory).await,
    ));
    results.push(TestResult::from_result(
        "latest",
        "latest_for_set_omits_vehicles_without_samples",
        latest_for_set_omits_vehicles_without_samples(factory).await,
    ));
    results.push(TestResult::from_result(
        "latest",
        "latest_for_set_empty_input",
        latest_for_set_empty_input(factory).await,
    ));

    results
}

// ── 1. unknown vehicle ───────────────────────────────────────────────────────

async fn latest_unknown_vehicle_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.latest("bus-404").await {
        Err(StorageError::NotFound { vehicle_id }) if vehicle_id == "bus-404" => Ok(()),
        other => Err(format!("expected NotFound for bus-404, got {:?}", other)),
    }
}

// ── 2. t=10, t=5, t=8 -> latest is t=10 ──────────────────────────────────────

async fn latest_ignores_insertion_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut newest = None;
    for offset in [10, 5, 8] {
        let stored = s
            .record(make_sample("bus-1", offset))
            .await
            .map_err(|e| format!("record t={offset}: {e}"))?;
        if offset == 10 {
            newest = Some(stored);
        }
    }
    let newest = newest.ok_or("t=10 sample missing")?;

    let latest = s
        .latest("bus-1")
        .await
        .map_err(|e| format!("latest: {e}"))?;
    if latest.id != newest.id || latest.timestamp != newest.timestamp {
        return Err(format!(
            "expected sample {} at {}, got {} at {}",
            newest.id, newest.timestamp, latest.id, latest.timestamp
        ));
    }
    Ok(())
}

// ── 3. vehicles do not see each other's samples ──────────────────────────────

async fn latest_is_scoped_per_vehicle<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.record(make_sample("bus-1", 1))
        .await
        .map_err(|e| format!("record bus-1: {e}"))?;
    s.record(make_sample("bus-2", 100))
        .await
        .map_err(|e| format!("record bus-2: {e}"))?;

    let latest = s
        .latest("bus-1")
        .await
        .map_err(|e| format!("latest: {e}"))?;
    if latest.vehicle_id != "bus-1" {
        return Err(format!("latest(bus-1) returned {}", latest.vehicle_id));
    }
    Ok(())
}

// ── 4. set lookup skips vehicles without samples ────────────────────────────

async fn latest_for_set_omits_vehicles_without_samples<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for (vehicle, offset) in [("bus-1", 1), ("bus-1", 9), ("bus-2", 3)] {
        s.record(make_sample(vehicle, offset))
            .await
            .map_err(|e| format!("record {vehicle}: {e}"))?;
    }

    let ids = vec![
        "bus-1".to_string(),
        "bus-2".to_string(),
        "bus-3".to_string(),
    ];
    let latest = s
        .latest_for_set(&ids)
        .await
        .map_err(|e| format!("latest_for_set: {e}"))?;

    if latest.len() != 2 {
        return Err(format!("expected 2 entries, got {}", latest.len()));
    }
    if latest.contains_key("bus-3") {
        return Err("bus-3 has no samples but is present".to_string());
    }
    let bus1 = latest.get("bus-1").ok_or("bus-1 missing")?;
    let expected = super::base_time() + time::Duration::seconds(9);
    if bus1.timestamp != expected {
        return Err(format!("bus-1 latest at {}, expected {expected}", bus1.timestamp));
    }
    Ok(())
}

// ── 5. empty set ─────────────────────────────────────────────────────────────

async fn latest_for_set_empty_input<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.record(make_sample("bus-1", 0))
        .await
        .map_err(|e| format!("record: {e}"))?;
    let latest = s
        .latest_for_set(&[])
        .await
        .map_err(|e| format!("latest_for_set: {e}"))?;
    if !latest.is_empty() {
        return Err(format!("expected empty map, got {} entries", latest.len()));
    }
    Ok(())
}
