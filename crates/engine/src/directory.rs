//! Read-only lookups against fleet administration data.
//!
//! Vehicles, stops, routes and trips are managed elsewhere. The engine only
//! needs a handful of lookups, expressed by [`FleetDirectory`]. The bundled
//! [`JsonDirectory`] serves them from a fleet document on disk:
//!
//! ```json
//! {
//!   "vehicles": [{"id": "bus-1", "capacity": 40, "status": "active"}],
//!   "stops": [{"id": "s1", "name": "Depot", "latitude": 40.7, "longitude": -74.0}],
//!   "routes": [{"id": "r1", "name": "Line 1",
//!               "stops": [{"stopId": "s1", "order": 1, "scheduledTime": "06:00"}]}],
//!   "trips": [{"id": "t1", "routeId": "r1", "vehicleId": "bus-1",
//!              "date": "2026-10-17", "status": "in_progress"}]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use fleetline_core::{
    FleetError, RouteDocument, RouteStopDocument, Stop, Trip, TripStatus, Vehicle,
};
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

/// Lookups the resolver and hub consume. All are read-only.
#[async_trait]
pub trait FleetDirectory: Send + Sync + 'static {
    /// Returns `Err(FleetError::NotFound)` for an unknown id.
    async fn vehicle(&self, id: &str) -> Result<Vehicle, FleetError>;

    /// Every vehicle whose status is `active`, ordered by id.
    async fn active_vehicles(&self) -> Result<Vec<Vehicle>, FleetError>;

    /// Returns `Err(FleetError::NotFound)` for an unknown id.
    async fn trip(&self, id: &str) -> Result<Trip, FleetError>;

    /// The trip `vehicle_id` is running on `date`, if any.
    ///
    /// Only `scheduled` and `in_progress` trips qualify. When several do,
    /// `in_progress` wins, then the lowest trip id.
    async fn active_trip(&self, vehicle_id: &str, date: Date) -> Result<Option<Trip>, FleetError>;

    /// A route with its stops joined against the stop table.
    ///
    /// Stops that reference an unknown stop id are returned without
    /// coordinates; validation is left to the caller.
    async fn route(&self, id: &str) -> Result<RouteDocument, FleetError>;
}

/// One stop reference inside a route record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStopRef {
    pub stop_id: String,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub scheduled_time: Option<String>,
}

/// A route as administered: stop references, not coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stops: Vec<RouteStopRef>,
}

/// The on-disk fleet document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetDocument {
    #[serde(default)]
    pub vehicles: Vec<Vehicle>,
    #[serde(default)]
    pub stops: Vec<Stop>,
    #[serde(default)]
    pub routes: Vec<RouteRecord>,
    #[serde(default)]
    pub trips: Vec<Trip>,
}

/// In-memory directory built from a [`FleetDocument`].
#[derive(Debug, Default)]
pub struct JsonDirectory {
    vehicles: HashMap<String, Vehicle>,
    stops: HashMap<String, Stop>,
    routes: HashMap<String, RouteRecord>,
    trips: HashMap<String, Trip>,
    /// vehicle id -> (service date, trip id)
    trips_by_vehicle: HashMap<String, Vec<(Date, String)>>,
}

impl JsonDirectory {
    /// Load and index a fleet document from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self, FleetError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FleetError::Internal(format!("failed to read {}: {}", path.display(), e))
        })?;
        let document: FleetDocument = serde_json::from_str(&raw).map_err(|e| {
            FleetError::InvalidArgument(format!("malformed fleet document {}: {}", path.display(), e))
        })?;
        Self::from_document(document)
    }

    /// Index a fleet document.
    ///
    /// Trip dates must be `YYYY-MM-DD`; anything else is `InvalidArgument`.
    pub fn from_document(document: FleetDocument) -> Result<Self, FleetError> {
        let date_format = format_description!("[year]-[month]-[day]");

        let mut trips_by_vehicle: HashMap<String, Vec<(Date, String)>> = HashMap::new();
        for trip in &document.trips {
            let date = Date::parse(&trip.date, date_format).map_err(|_| {
                FleetError::InvalidArgument(format!(
                    "trip '{}' has malformed date '{}'",
                    trip.id, trip.date
                ))
            })?;
            trips_by_vehicle
                .entry(trip.vehicle_id.clone())
                .or_default()
                .push((date, trip.id.clone()));
        }

        Ok(Self {
            vehicles: index(document.vehicles, |v| v.id.clone()),
            stops: index(document.stops, |s| s.id.clone()),
            routes: index(document.routes, |r| r.id.clone()),
            trips: index(document.trips, |t| t.id.clone()),
            trips_by_vehicle,
        })
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }
}

fn index<T>(items: Vec<T>, key: impl Fn(&T) -> String) -> HashMap<String, T> {
    items.into_iter().map(|item| (key(&item), item)).collect()
}

#[async_trait]
impl FleetDirectory for JsonDirectory {
    async fn vehicle(&self, id: &str) -> Result<Vehicle, FleetError> {
        self.vehicles
            .get(id)
            .cloned()
            .ok_or_else(|| FleetError::not_found(format!("vehicle '{id}'")))
    }

    async fn active_vehicles(&self) -> Result<Vec<Vehicle>, FleetError> {
        let mut active: Vec<Vehicle> = self
            .vehicles
            .values()
            .filter(|v| v.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    async fn trip(&self, id: &str) -> Result<Trip, FleetError> {
        self.trips
            .get(id)
            .cloned()
            .ok_or_else(|| FleetError::not_found(format!("trip '{id}'")))
    }

    async fn active_trip(&self, vehicle_id: &str, date: Date) -> Result<Option<Trip>, FleetError> {
        let candidates = match self.trips_by_vehicle.get(vehicle_id) {
            Some(c) => c,
            None => return Ok(None),
        };
        let best = candidates
            .iter()
            .filter(|(d, _)| *d == date)
            .filter_map(|(_, id)| self.trips.get(id))
            .filter(|t| t.status.is_active())
            .min_by(|a, b| {
                let rank = |t: &Trip| u8::from(t.status != TripStatus::InProgress);
                rank(a).cmp(&rank(b)).then_with(|| a.id.cmp(&b.id))
            });
        Ok(best.cloned())
    }

    async fn route(&self, id: &str) -> Result<RouteDocument, FleetError> {
        let record = self
            .routes
            .get(id)
            .ok_or_else(|| FleetError::not_found(format!("route '{id}'")))?;

        let stops = record
            .stops
            .iter()
            .map(|r| {
                let stop = self.stops.get(&r.stop_id);
                RouteStopDocument {
                    stop_id: r.stop_id.clone(),
                    name: stop.map(|s| s.name.clone()),
                    order: r.order,
                    scheduled_time: r.scheduled_time.clone(),
                    latitude: stop.map(|s| s.latitude),
                    longitude: stop.map(|s| s.longitude),
                }
            })
            .collect();

        Ok(RouteDocument {
            id: record.id.clone(),
            name: record.name.clone(),
            stops,
        })
    }
}
