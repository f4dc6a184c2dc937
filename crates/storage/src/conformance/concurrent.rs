use std::future::Future;
use std::sync::Arc;

use super::{make_sample, TestResult};
use crate::PositionStore;

/// Number of concurrent tasks to spawn in each test.
const N: i64 = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_records_different_vehicles_all_land",
        concurrent_records_different_vehicles_all_land(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_out_of_order_records_latest_is_max",
        concurrent_out_of_order_records_latest_is_max(factory).await,
    ));

    results
}

// ── Independent vehicles ─────────────────────────────────────────────────────

/// N tasks each record one sample for their own vehicle. Every vehicle
/// must end up with exactly its sample.
async fn concurrent_records_different_vehicles_all_land<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            s.record(make_sample(&format!("bus-{i}"), i)).await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("record: {e}"))?;
    }

    let ids: Vec<String> = (0..N).map(|i| format!("bus-{i}")).collect();
    let latest = store
        .latest_for_set(&ids)
        .await
        .map_err(|e| format!("latest_for_set: {e}"))?;
    if latest.len() != N as usize {
        return Err(format!("expected {N} vehicles, got {}", latest.len()));
    }
    for (id, sample) in &latest {
        if &sample.vehicle_id != id {
            return Err(format!("{id} holds a sample for {}", sample.vehicle_id));
        }
    }
    Ok(())
}

// ── Same vehicle, shuffled timestamps ───────────────────────────────────────

/// N tasks record samples for one vehicle with timestamps arriving in a
/// scrambled order. `latest` must return the maximum timestamp.
async fn concurrent_out_of_order_records_latest_is_max<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        // 7 is coprime with N, so this visits every offset once in scrambled order.
        let offset = (i * 7) % N;
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            s.record(make_sample("bus-1", offset)).await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("record: {e}"))?;
    }

    let latest = store
        .latest("bus-1")
        .await
        .map_err(|e| format!("latest: {e}"))?;
    let expected = super::base_time() + time::Duration::seconds(N - 1);
    if latest.timestamp != expected {
        return Err(format!("latest at {}, expected {expected}", latest.timestamp));
    }
    Ok(())
}
