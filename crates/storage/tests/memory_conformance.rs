//! Runs the backend-agnostic conformance suite against the in-memory store.

use fleetline_storage::conformance::run_conformance_suite;
use fleetline_storage::MemoryPositionStore;

#[tokio::test]
async fn memory_store_passes_conformance_suite() {
    let report = run_conformance_suite(|| async { MemoryPositionStore::new() }).await;
    assert!(report.total > 0);
    assert_eq!(report.failed, 0, "{report}");
}
