//! Validated route schedules.
//!
//! A [`Schedule`] is the only input the simulator accepts. Construction
//! enforces the route invariants: at least two stops, strictly increasing
//! order indices, strictly increasing scheduled times and valid coordinates.

use time::{OffsetDateTime, UtcOffset};

use crate::error::FleetError;
use crate::geo::Coordinates;
use crate::model::RouteDocument;

/// Parse a `"HH:MM"` time of day into minutes since midnight.
pub fn parse_time_of_day(raw: &str) -> Result<u32, FleetError> {
    let invalid = || FleetError::invalid_route(format!("malformed scheduled time '{raw}'"));

    let (hours, minutes) = raw.trim().split_once(':').ok_or_else(invalid)?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return Err(invalid());
    }
    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    Ok(hours * 60 + minutes)
}

/// Minutes since local midnight (with seconds as a fraction) for `instant`
/// viewed at `offset`.
pub fn minutes_of_day(instant: OffsetDateTime, offset: UtcOffset) -> f64 {
    let local = instant.to_offset(offset);
    let seconds = local.hour() as f64 * 3600.0
        + local.minute() as f64 * 60.0
        + local.second() as f64
        + local.nanosecond() as f64 / 1e9;
    seconds / 60.0
}

/// One stop with its resolved position and scheduled minute of day.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledStop {
    pub stop_id: String,
    pub name: Option<String>,
    pub coordinates: Coordinates,
    pub scheduled_minutes: f64,
}

/// An ordered, validated list of scheduled stops.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    route_id: String,
    stops: Vec<ScheduledStop>,
}

impl Schedule {
    /// Validate an already-ordered stop list.
    pub fn new(route_id: impl Into<String>, stops: Vec<ScheduledStop>) -> Result<Self, FleetError> {
        let route_id = route_id.into();
        if stops.len() < 2 {
            return Err(FleetError::invalid_route(format!(
                "route '{}' has {} stop(s), at least 2 are required",
                route_id,
                stops.len()
            )));
        }
        for pair in stops.windows(2) {
            if pair[1].scheduled_minutes <= pair[0].scheduled_minutes {
                return Err(FleetError::invalid_route(format!(
                    "route '{}' schedule is not strictly increasing at stop '{}'",
                    route_id, pair[1].stop_id
                )));
            }
        }
        for stop in &stops {
            if !stop.coordinates.is_valid() || !stop.scheduled_minutes.is_finite() {
                return Err(FleetError::invalid_route(format!(
                    "route '{}' stop '{}' has invalid coordinates",
                    route_id, stop.stop_id
                )));
            }
        }
        Ok(Schedule { route_id, stops })
    }

    /// Validate a directory route document.
    ///
    /// Stops are ordered by their order index; duplicate or missing indices,
    /// missing coordinates and unparseable times are all `InvalidRoute`.
    pub fn from_route(route: &RouteDocument) -> Result<Self, FleetError> {
        let mut indexed = Vec::with_capacity(route.stops.len());
        for (position, doc) in route.stops.iter().enumerate() {
            let order = doc.order.unwrap_or(position as i64);
            let time = doc.scheduled_time.as_deref().ok_or_else(|| {
                FleetError::invalid_route(format!(
                    "route '{}' stop '{}' has no scheduled time",
                    route.id, doc.stop_id
                ))
            })?;
            let (latitude, longitude) = match (doc.latitude, doc.longitude) {
                (Some(lat), Some(lng)) => (lat, lng),
                _ => {
                    return Err(FleetError::invalid_route(format!(
                        "route '{}' stop '{}' has no coordinates",
                        route.id, doc.stop_id
                    )))
                }
            };
            let coordinates = Coordinates::new(latitude, longitude).map_err(|_| {
                FleetError::invalid_route(format!(
                    "route '{}' stop '{}' has invalid coordinates",
                    route.id, doc.stop_id
                ))
            })?;
            indexed.push((
                order,
                ScheduledStop {
                    stop_id: doc.stop_id.clone(),
                    name: doc.name.clone(),
                    coordinates,
                    scheduled_minutes: parse_time_of_day(time)? as f64,
                },
            ));
        }

        indexed.sort_by_key(|(order, _)| *order);
        if let Some(pair) = indexed.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(FleetError::invalid_route(format!(
                "route '{}' repeats order index {}",
                route.id, pair[0].0
            )));
        }

        Schedule::new(
            route.id.clone(),
            indexed.into_iter().map(|(_, stop)| stop).collect(),
        )
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn stops(&self) -> &[ScheduledStop] {
        &self.stops
    }

    pub fn first(&self) -> &ScheduledStop {
        &self.stops[0]
    }

    pub fn last(&self) -> &ScheduledStop {
        &self.stops[self.stops.len() - 1]
    }

    /// Index `i` of the segment with `stops[i] <= now < stops[i + 1]`, or
    /// `None` when `now` falls before the first or at/after the last stop.
    pub fn segment_at(&self, now_minutes: f64) -> Option<usize> {
        if now_minutes < self.first().scheduled_minutes
            || now_minutes >= self.last().scheduled_minutes
        {
            return None;
        }
        // First stop strictly after `now`; the segment starts one before it.
        let next = self
            .stops
            .partition_point(|stop| stop.scheduled_minutes <= now_minutes);
        Some(next - 1)
    }
}
