//! fleetline-core: the pure half of the fleet position engine.
//!
//! Nothing in this crate performs I/O. It provides:
//!
//! - [`geo`] -- haversine distance, initial bearing, segment interpolation
//! - [`model`] -- vehicles, stops, routes, trips and resolved positions
//! - [`schedule`] -- `"HH:MM"` parsing and validated [`Schedule`]s
//! - [`simulator`] -- synthetic positions interpolated along a schedule
//! - [`jitter`] -- injectable speed realism strategies
//! - [`error`] -- the [`FleetError`] taxonomy shared by every layer

pub mod error;
pub mod geo;
pub mod jitter;
pub mod model;
pub mod schedule;
pub mod simulator;

// ── Convenience re-exports ───────────────────────────────────────────

pub use error::FleetError;
pub use geo::{bearing, distance, lerp, Coordinates};
pub use jitter::{NoJitter, SeededJitter, SpeedJitter, UniformJitter};
pub use model::{
    PositionSource, ResolvedPosition, RouteDocument, RouteStopDocument, Stop, Trip, TripStatus,
    Vehicle, VehicleStatus,
};
pub use schedule::{minutes_of_day, parse_time_of_day, Schedule, ScheduledStop};
pub use simulator::{ScheduleSimulator, SimulatedPosition, DEFAULT_MAX_SPEED_KMH};
