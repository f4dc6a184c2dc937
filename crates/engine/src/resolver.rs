//! Position resolution policy.
//!
//! For a vehicle, a real sample no older than the freshness window always
//! wins. Without one, the vehicle's active trip is simulated along its
//! route. With neither the answer is `NotFound`.

use std::collections::HashMap;
use std::sync::Arc;

use fleetline_core::{
    minutes_of_day, FleetError, PositionSource, ResolvedPosition, RouteDocument, Schedule,
    ScheduleSimulator, Trip,
};
use fleetline_storage::{NewSample, PositionSample, PositionStore, StorageError, MAX_CLOCK_SKEW};
use futures_util::future::join_all;
use time::{Duration, OffsetDateTime, UtcOffset};
use tracing::{debug, warn};

use crate::cache::LookupCache;
use crate::directory::FleetDirectory;

/// Default maximum age of a real sample still considered authoritative.
pub const DEFAULT_FRESHNESS_SECS: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverConfig {
    pub freshness: Duration,
    /// Offset used to turn instants into schedule minutes and service dates.
    pub utc_offset: UtcOffset,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::seconds(DEFAULT_FRESHNESS_SECS),
            utc_offset: UtcOffset::UTC,
        }
    }
}

/// An active trip paired with its validated schedule.
struct TripPlan {
    trip: Trip,
    schedule: Option<Schedule>,
}

pub struct PositionResolver {
    store: Arc<dyn PositionStore>,
    directory: Arc<dyn FleetDirectory>,
    cache: Arc<dyn LookupCache>,
    simulator: ScheduleSimulator,
    config: ResolverConfig,
}

impl PositionResolver {
    pub fn new(
        store: Arc<dyn PositionStore>,
        directory: Arc<dyn FleetDirectory>,
        cache: Arc<dyn LookupCache>,
        simulator: ScheduleSimulator,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            directory,
            cache,
            simulator,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn PositionStore> {
        &self.store
    }

    pub fn directory(&self) -> &Arc<dyn FleetDirectory> {
        &self.directory
    }

    pub fn cache(&self) -> &Arc<dyn LookupCache> {
        &self.cache
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve one vehicle's current position as of `now`.
    pub async fn resolve(
        &self,
        vehicle_id: &str,
        now: OffsetDateTime,
    ) -> Result<ResolvedPosition, FleetError> {
        let latest = match self.store.latest(vehicle_id).await {
            Ok(sample) => Some(sample),
            Err(StorageError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        self.resolve_with(vehicle_id, latest, now).await
    }

    /// Resolve a set of vehicles concurrently.
    ///
    /// Vehicles that cannot be resolved are left out; the failure is logged.
    pub async fn resolve_many(
        &self,
        vehicle_ids: &[String],
        now: OffsetDateTime,
    ) -> Result<Vec<ResolvedPosition>, FleetError> {
        let mut latest: HashMap<String, PositionSample> =
            self.store.latest_for_set(vehicle_ids).await?;

        let lookups = vehicle_ids.iter().map(|id| {
            let sample = latest.remove(id);
            async move { (id, self.resolve_with(id, sample, now).await) }
        });

        let mut positions = Vec::with_capacity(vehicle_ids.len());
        for (id, result) in join_all(lookups).await {
            match result {
                Ok(position) => positions.push(position),
                Err(FleetError::NotFound(reason)) => {
                    debug!(vehicle_id = %id, %reason, "no position to resolve");
                }
                Err(e) => warn!(vehicle_id = %id, error = %e, "resolution failed"),
            }
        }
        Ok(positions)
    }

    /// Persist the simulated position of `vehicle_id` as a real sample.
    ///
    /// Requires an active trip with a valid route; anything less is
    /// `NotFound`.
    pub async fn simulate_step(
        &self,
        vehicle_id: &str,
        now: OffsetDateTime,
    ) -> Result<PositionSample, FleetError> {
        self.directory.vehicle(vehicle_id).await?;
        let plan = self
            .active_plan(vehicle_id, now)
            .await?
            .ok_or_else(|| FleetError::not_found(format!("no active trip for vehicle '{vehicle_id}'")))?;
        let schedule = plan.schedule.ok_or_else(|| {
            FleetError::not_found(format!(
                "trip '{}' has no simulatable route",
                plan.trip.id
            ))
        })?;

        let minutes = minutes_of_day(now, self.config.utc_offset);
        let simulated = self.simulator.simulate(&schedule, minutes);
        let sample = NewSample::new(vehicle_id, simulated.coordinates)
            .with_speed(simulated.speed)
            .with_heading(simulated.heading)
            .at(now);
        Ok(self.store.record(sample).await?)
    }

    async fn resolve_with(
        &self,
        vehicle_id: &str,
        latest: Option<PositionSample>,
        now: OffsetDateTime,
    ) -> Result<ResolvedPosition, FleetError> {
        let plan = self.active_plan(vehicle_id, now).await?;
        let minutes = minutes_of_day(now, self.config.utc_offset);

        if let Some(sample) = latest.filter(|s| self.is_fresh(s, now)) {
            let (trip_id, progress) = match &plan {
                Some(plan) => (
                    Some(plan.trip.id.clone()),
                    plan.schedule
                        .as_ref()
                        .map(|s| self.simulator.progress(s, minutes)),
                ),
                None => (None, None),
            };
            return Ok(ResolvedPosition {
                vehicle_id: vehicle_id.to_string(),
                trip_id,
                coordinates: sample.coordinates,
                speed: sample.speed,
                heading: sample.heading,
                progress,
                source: PositionSource::Real,
                as_of: sample.timestamp,
            });
        }

        match plan {
            Some(TripPlan {
                trip,
                schedule: Some(schedule),
            }) => {
                let simulated = self.simulator.simulate(&schedule, minutes);
                Ok(ResolvedPosition {
                    vehicle_id: vehicle_id.to_string(),
                    trip_id: Some(trip.id),
                    coordinates: simulated.coordinates,
                    speed: Some(simulated.speed),
                    heading: Some(simulated.heading),
                    progress: Some(simulated.progress),
                    source: PositionSource::Simulated,
                    as_of: now,
                })
            }
            _ => Err(FleetError::not_found(format!(
                "no fresh sample or active trip for vehicle '{vehicle_id}'"
            ))),
        }
    }

    /// Within the freshness window, and not dated further ahead of `now`
    /// than clock skew explains.
    fn is_fresh(&self, sample: &PositionSample, now: OffsetDateTime) -> bool {
        let age = now - sample.timestamp;
        -MAX_CLOCK_SKEW <= age && age <= self.config.freshness
    }

    /// The active trip for `vehicle_id` on the local service date of `now`.
    ///
    /// An invalid or missing route leaves `schedule` empty instead of
    /// failing, so a fresh real sample can still be served.
    async fn active_plan(
        &self,
        vehicle_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<TripPlan>, FleetError> {
        let date = now.to_offset(self.config.utc_offset).date();
        let trip = match self.directory.active_trip(vehicle_id, date).await? {
            Some(trip) => trip,
            None => return Ok(None),
        };
        let schedule = match self.route(&trip.route_id).await {
            Ok(route) => match Schedule::from_route(&route) {
                Ok(schedule) => Some(schedule),
                Err(e) => {
                    debug!(trip_id = %trip.id, error = %e, "route cannot be simulated");
                    None
                }
            },
            Err(FleetError::NotFound(_)) => {
                debug!(trip_id = %trip.id, route_id = %trip.route_id, "trip references unknown route");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(Some(TripPlan { trip, schedule }))
    }

    async fn route(&self, route_id: &str) -> Result<RouteDocument, FleetError> {
        let key = format!("route:{route_id}");
        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_value::<RouteDocument>(cached) {
                Ok(route) => return Ok(route),
                Err(e) => {
                    debug!(%key, error = %e, "dropping malformed cached route");
                    self.cache.delete(&key).await;
                }
            }
        }

        let route = self.directory.route(route_id).await?;
        match serde_json::to_value(&route) {
            Ok(value) => {
                if let Err(e) = self.cache.set(&key, value).await {
                    debug!(%key, error = %e, "route not cached");
                }
            }
            Err(e) => debug!(%key, error = %e, "route not cached"),
        }
        Ok(route)
    }
}
