use fleetline_core::Coordinates;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::error::StorageError;

/// Default number of samples returned by a history query.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Hard cap on samples returned by a history query.
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// How far ahead of the receiving clock a sample timestamp may be.
pub const MAX_CLOCK_SKEW: Duration = Duration::seconds(30);

/// A location observation submitted for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSample {
    pub vehicle_id: String,
    pub coordinates: Coordinates,
    /// km/h
    pub speed: Option<f64>,
    /// Degrees clockwise from north.
    pub heading: Option<f64>,
    /// Observation time. `None` stamps the sample with the store's clock.
    pub timestamp: Option<OffsetDateTime>,
}

impl NewSample {
    pub fn new(vehicle_id: impl Into<String>, coordinates: Coordinates) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            coordinates,
            speed: None,
            heading: None,
            timestamp: None,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn at(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Reject anything a backend must not store.
    ///
    /// Every `PositionStore::record` implementation calls this before writing.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.vehicle_id.trim().is_empty() {
            return Err(StorageError::InvalidArgument(
                "vehicle id must not be empty".to_string(),
            ));
        }
        if !self.coordinates.is_valid() {
            return Err(StorageError::InvalidCoordinates {
                latitude: self.coordinates.latitude,
                longitude: self.coordinates.longitude,
            });
        }
        if let Some(speed) = self.speed {
            if !speed.is_finite() || speed < 0.0 {
                return Err(StorageError::InvalidArgument(format!(
                    "speed must be a non-negative number, got {speed}"
                )));
            }
        }
        if let Some(heading) = self.heading {
            if !(0.0..360.0).contains(&heading) {
                return Err(StorageError::InvalidArgument(format!(
                    "heading must be within [0, 360), got {heading}"
                )));
            }
        }
        Ok(())
    }

    /// Reject a timestamp more than [`MAX_CLOCK_SKEW`] ahead of `now`.
    ///
    /// A future-dated sample would stay the latest one for its vehicle and
    /// mask every real sample recorded after it.
    pub fn check_not_future(&self, now: OffsetDateTime) -> Result<(), StorageError> {
        match self.timestamp {
            Some(timestamp) if timestamp - now > MAX_CLOCK_SKEW => {
                Err(StorageError::InvalidArgument(format!(
                    "timestamp {timestamp} is ahead of the server clock ({now})"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// One immutable stored observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub id: u64,
    pub vehicle_id: String,
    pub coordinates: Coordinates,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// A bounded, inclusive time window for history retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub from: OffsetDateTime,
    pub to: OffsetDateTime,
    pub limit: usize,
}

impl HistoryQuery {
    /// Validate a query window.
    ///
    /// `limit` must be within `1..=MAX_HISTORY_LIMIT` and `from` must not be
    /// after `to`; otherwise `StorageError::InvalidArgument`.
    pub fn new(from: OffsetDateTime, to: OffsetDateTime, limit: usize) -> Result<Self, StorageError> {
        if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
            return Err(StorageError::InvalidArgument(format!(
                "limit must be between 1 and {MAX_HISTORY_LIMIT}, got {limit}"
            )));
        }
        if from > to {
            return Err(StorageError::InvalidArgument(
                "'from' must not be after 'to'".to_string(),
            ));
        }
        Ok(Self { from, to, limit })
    }

    /// The trailing `window` ending at `to`, with the default limit.
    pub fn trailing(to: OffsetDateTime, window: Duration) -> Self {
        Self {
            from: to - window,
            to,
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn contains(&self, timestamp: OffsetDateTime) -> bool {
        self.from <= timestamp && timestamp <= self.to
    }
}
