use std::future::Future;

use time::Duration;

use super::{base_time, make_sample, TestResult};
use crate::record::HistoryQuery;
use crate::PositionStore;

pub(super) async fn run_history_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "history",
        "history_newest_first",
        history_newest_first(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "history_window_bounds_inclusive",
        history_window_bounds_inclusive(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "history_truncates_to_limit",
        history_truncates_to_limit(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "history_unknown_vehicle_empty",
        history_unknown_vehicle_empty(factory).await,
    ));

    results
}

fn window(from_secs: i64, to_secs: i64, limit: usize) -> Result<HistoryQuery, String> {
    HistoryQuery::new(
        base_time() + Duration::seconds(from_secs),
        base_time() + Duration::seconds(to_secs),
        limit,
    )
    .map_err(|e| format!("query: {e}"))
}

fn offsets(samples: &[crate::PositionSample]) -> Vec<i64> {
    samples
        .iter()
        .map(|s| (s.timestamp - base_time()).whole_seconds())
        .collect()
}

// ── 1. ordering ──────────────────────────────────────────────────────────────

async fn history_newest_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for offset in [30, 10, 50, 20, 40] {
        s.record(make_sample("bus-1", offset))
            .await
            .map_err(|e| format!("record t={offset}: {e}"))?;
    }
    let history = s
        .history("bus-1", &window(0, 100, 100)?)
        .await
        .map_err(|e| format!("history: {e}"))?;
    let got = offsets(&history);
    if got != vec![50, 40, 30, 20, 10] {
        return Err(format!("expected [50, 40, 30, 20, 10], got {got:?}"));
    }
    Ok(())
}

// ── 2. both ends of the window are included ─────────────────────────────────

async fn history_window_bounds_inclusive<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for offset in [0, 10, 20, 30, 40] {
        s.record(make_sample("bus-1", offset))
            .await
            .map_err(|e| format!("record t={offset}: {e}"))?;
    }
    let history = s
        .history("bus-1", &window(10, 30, 100)?)
        .await
        .map_err(|e| format!("history: {e}"))?;
    let got = offsets(&history);
    if got != vec![30, 20, 10] {
        return Err(format!("expected [30, 20, 10], got {got:?}"));
    }
    Ok(())
}

// ── 3. limit keeps the newest ───────────────────────────────────────────────

async fn history_truncates_to_limit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for offset in 0..10 {
        s.record(make_sample("bus-1", offset))
            .await
            .map_err(|e| format!("record t={offset}: {e}"))?;
    }
    let history = s
        .history("bus-1", &window(0, 100, 3)?)
        .await
        .map_err(|e| format!("history: {e}"))?;
    let got = offsets(&history);
    if got != vec![9, 8, 7] {
        return Err(format!("expected [9, 8, 7], got {got:?}"));
    }
    Ok(())
}

// ── 4. unknown vehicle ──────────────────────────────────────────────────────

async fn history_unknown_vehicle_empty<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let history = s
        .history("bus-404", &window(0, 100, 10)?)
        .await
        .map_err(|e| format!("history: {e}"))?;
    if !history.is_empty() {
        return Err(format!("expected no samples, got {}", history.len()));
    }
    Ok(())
}
