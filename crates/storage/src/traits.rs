use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{HistoryQuery, NewSample, PositionSample};

/// The storage trait for Fleetline position backends.
///
/// A `PositionStore` is an append-only log of immutable location samples
/// keyed by vehicle id and timestamp.
///
/// ## Ordering
///
/// Writers for the same vehicle may arrive out of order. Every read resolves
/// "latest" by the maximum `timestamp`, never by arrival order. When two
/// samples share a timestamp, the one recorded last wins.
///
/// ## Concurrency
///
/// `record` calls for different vehicles must not serialize behind one
/// another, and reads must be served while writes are in flight. A single
/// insert is atomic; no other write-side ordering is required.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared through
/// axum application state and across async task boundaries.
#[async_trait]
pub trait PositionStore: Send + Sync + 'static {
    /// Validate and append a sample.
    ///
    /// Returns `Err(StorageError::InvalidCoordinates)` or
    /// `Err(StorageError::InvalidArgument)` without storing anything when
    /// [`NewSample::validate`] fails. Failed writes are not retried.
    async fn record(&self, sample: NewSample) -> Result<PositionSample, StorageError>;

    /// The sample with the greatest timestamp for `vehicle_id`.
    ///
    /// Returns `Err(StorageError::NotFound)` if the vehicle has no samples.
    async fn latest(&self, vehicle_id: &str) -> Result<PositionSample, StorageError>;

    /// One latest sample per vehicle id in `vehicle_ids`.
    ///
    /// Vehicles without samples are absent from the map; that is not an error.
    async fn latest_for_set(
        &self,
        vehicle_ids: &[String],
    ) -> Result<HashMap<String, PositionSample>, StorageError>;

    /// Samples for `vehicle_id` with `query.from <= timestamp <= query.to`,
    /// newest first, truncated to `query.limit`.
    ///
    /// An unknown vehicle yields an empty list.
    async fn history(
        &self,
        vehicle_id: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<PositionSample>, StorageError>;
}
