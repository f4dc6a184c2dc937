//! Conformance test suite for `PositionStore` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `PositionStore` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Ingest**: validation before write, ids and default timestamps
//! - **Latest**: maximum-timestamp semantics independent of arrival order
//! - **History**: inclusive windows, newest-first ordering, limits
//! - **Concurrency**: parallel writers across and within vehicles
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty store for each test:
//!
//! ```ignore
//! use fleetline_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_store().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod history;
mod ingest;
mod latest;

use std::fmt;
use std::future::Future;

use fleetline_core::Coordinates;
use time::{Duration, OffsetDateTime};

use crate::record::NewSample;
use crate::PositionStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "ingest", "latest", "history").
    pub category: String,
    /// Test name (e.g. "latest_ignores_insertion_order").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a store backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// store instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: PositionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(ingest::run_ingest_tests(&factory).await);
    results.extend(latest::run_latest_tests(&factory).await);
    results.extend(history::run_history_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: sample constructors with sensible defaults ──────────────────────

/// Fixed reference instant so expectations do not depend on the wall clock.
fn base_time() -> OffsetDateTime {
    time::macros::datetime!(2026-01-01 06:00 UTC)
}

/// A valid sample for `vehicle_id` taken `offset_secs` after [`base_time`].
fn make_sample(vehicle_id: &str, offset_secs: i64) -> NewSample {
    NewSample::new(
        vehicle_id,
        Coordinates {
            latitude: 40.0 + offset_secs as f64 / 10_000.0,
            longitude: -74.0,
        },
    )
    .with_speed(25.0)
    .with_heading(90.0)
    .at(base_time() + Duration::seconds(offset_secs))
}
