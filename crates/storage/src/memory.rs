//! In-process `PositionStore` backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};

use crate::error::StorageError;
use crate::record::{HistoryQuery, NewSample, PositionSample};
use crate::traits::PositionStore;

/// Samples for one vehicle, kept sorted by timestamp.
type Track = Arc<Mutex<Vec<PositionSample>>>;

/// A `PositionStore` held entirely in memory.
///
/// Each vehicle owns its own track lock, so writers for different vehicles
/// never contend. The outer map is only write-locked the first time a
/// vehicle is seen.
#[derive(Default)]
pub struct MemoryPositionStore {
    tracks: RwLock<HashMap<String, Track>>,
    next_id: AtomicU64,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vehicles with at least one sample.
    pub async fn vehicle_count(&self) -> usize {
        self.tracks.read().await.len()
    }

    async fn track(&self, vehicle_id: &str) -> Option<Track> {
        self.tracks.read().await.get(vehicle_id).cloned()
    }

    async fn track_or_insert(&self, vehicle_id: &str) -> Track {
        if let Some(track) = self.track(vehicle_id).await {
            return track;
        }
        let mut tracks = self.tracks.write().await;
        tracks.entry(vehicle_id.to_string()).or_default().clone()
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn record(&self, sample: NewSample) -> Result<PositionSample, StorageError> {
        sample.validate()?;

        let stored = PositionSample {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            vehicle_id: sample.vehicle_id,
            coordinates: sample.coordinates,
            speed: sample.speed,
            heading: sample.heading,
            timestamp: sample.timestamp.unwrap_or_else(OffsetDateTime::now_utc),
        };

        let track = self.track_or_insert(&stored.vehicle_id).await;
        let mut samples = track.lock().await;
        // Equal timestamps go after existing ones so the newest arrival wins ties.
        let at = samples.partition_point(|s| s.timestamp <= stored.timestamp);
        samples.insert(at, stored.clone());

        tracing::trace!(
            vehicle_id = %stored.vehicle_id,
            sample_id = stored.id,
            "recorded position sample"
        );
        Ok(stored)
    }

    async fn latest(&self, vehicle_id: &str) -> Result<PositionSample, StorageError> {
        let not_found = || StorageError::NotFound {
            vehicle_id: vehicle_id.to_string(),
        };
        let track = self.track(vehicle_id).await.ok_or_else(not_found)?;
        let samples = track.lock().await;
        samples.last().cloned().ok_or_else(not_found)
    }

    async fn latest_for_set(
        &self,
        vehicle_ids: &[String],
    ) -> Result<HashMap<String, PositionSample>, StorageError> {
        let tracks: Vec<(String, Track)> = {
            let map = self.tracks.read().await;
            vehicle_ids
                .iter()
                .filter_map(|id| map.get(id).map(|t| (id.clone(), t.clone())))
                .collect()
        };

        let mut latest = HashMap::with_capacity(tracks.len());
        for (id, track) in tracks {
            if let Some(sample) = track.lock().await.last() {
                latest.insert(id, sample.clone());
            }
        }
        Ok(latest)
    }

    async fn history(
        &self,
        vehicle_id: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<PositionSample>, StorageError> {
        let track = match self.track(vehicle_id).await {
            Some(track) => track,
            None => return Ok(Vec::new()),
        };
        let samples = track.lock().await;
        let end = samples.partition_point(|s| s.timestamp <= query.to);
        let start = samples.partition_point(|s| s.timestamp < query.from);
        Ok(samples[start..end.max(start)]
            .iter()
            .rev()
            .take(query.limit)
            .cloned()
            .collect())
    }
}
