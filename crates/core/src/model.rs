//! Fleet data model.
//!
//! Vehicles, stops, routes and trips are owned by external administration
//! tooling and reach the engine as loosely validated documents. Routes in
//! particular are only trusted once [`Schedule::from_route`] has accepted
//! them.
//!
//! [`Schedule::from_route`]: crate::schedule::Schedule::from_route

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::geo::Coordinates;

/// Operational status of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Active,
    Maintenance,
}

/// A tracked bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    #[serde(default)]
    pub capacity: u32,
    pub status: VehicleStatus,
}

impl Vehicle {
    pub fn is_active(&self) -> bool {
        self.status == VehicleStatus::Active
    }
}

/// A fixed geographic waypoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// One stop of a route as delivered by the directory.
///
/// Every field the simulator depends on is optional here; a missing or
/// malformed value is reported as an invalid route, never a panic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStopDocument {
    pub stop_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub scheduled_time: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// A route with its stops already joined against the stop table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDocument {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stops: Vec<RouteStopDocument>,
}

/// Lifecycle of a trip: scheduled -> in_progress -> completed | cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    /// Scheduled and in-progress trips drive simulation.
    pub fn is_active(self) -> bool {
        matches!(self, TripStatus::Scheduled | TripStatus::InProgress)
    }
}

/// One dated run of a route by a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: String,
    pub route_id: String,
    pub vehicle_id: String,
    /// Service date, `YYYY-MM-DD`.
    pub date: String,
    pub status: TripStatus,
    #[serde(default)]
    pub direction: Option<String>,
}

/// Where a resolved position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSource {
    /// A fresh observed sample.
    Real,
    /// Interpolated along the active trip's schedule.
    Simulated,
}

/// The engine's single current answer for a vehicle. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPosition {
    pub vehicle_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trip_id: Option<String>,
    pub coordinates: Coordinates,
    /// km/h
    pub speed: Option<f64>,
    /// Degrees clockwise from north.
    pub heading: Option<f64>,
    /// Percent of the route completed, 0..=100.
    pub progress: Option<f64>,
    pub source: PositionSource,
    #[serde(with = "time::serde::rfc3339")]
    pub as_of: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trip_status_activity() {
        assert!(TripStatus::Scheduled.is_active());
        assert!(TripStatus::InProgress.is_active());
        assert!(!TripStatus::Completed.is_active());
        assert!(!TripStatus::Cancelled.is_active());
    }

    #[test]
    fn trip_deserializes_from_camel_case() {
        let trip: Trip = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "routeId": "r1",
            "vehicleId": "bus-1",
            "date": "2026-10-17",
            "status": "in_progress",
        }))
        .unwrap();
        assert_eq!(trip.status, TripStatus::InProgress);
        assert_eq!(trip.direction, None);
    }

    #[test]
    fn resolved_position_serializes_rfc3339() {
        let position = ResolvedPosition {
            vehicle_id: "bus-1".to_string(),
            trip_id: None,
            coordinates: Coordinates {
                latitude: 1.0,
                longitude: 2.0,
            },
            speed: Some(12.5),
            heading: None,
            progress: Some(50.0),
            source: PositionSource::Simulated,
            as_of: time::macros::datetime!(2026-10-17 06:15 UTC),
        };
        let json = serde_json::to_value(&position).unwrap();
        assert_eq!(json["vehicleId"], "bus-1");
        assert_eq!(json["source"], "simulated");
        assert_eq!(json["asOf"], "2026-10-17T06:15:00Z");
        assert!(json.get("tripId").is_none());
    }
}
