pub(crate) mod simulate;
pub(crate) mod watch;

use fleetline_core::{PositionSource, ResolvedPosition};

/// One-line human summary of a resolved position.
pub(crate) fn describe_position(position: &ResolvedPosition) -> String {
    let source = match position.source {
        PositionSource::Real => "real",
        PositionSource::Simulated => "simulated",
    };
    let mut line = format!(
        "{:<12} {:>10.5} {:>11.5}  {:<9}",
        position.vehicle_id, position.coordinates.latitude, position.coordinates.longitude, source
    );
    if let Some(speed) = position.speed {
        line.push_str(&format!("  {speed:5.1} km/h"));
    }
    if let Some(heading) = position.heading {
        line.push_str(&format!("  {heading:5.1}°"));
    }
    if let Some(progress) = position.progress {
        line.push_str(&format!("  {progress:5.1}%"));
    }
    if let Some(trip_id) = &position.trip_id {
        line.push_str(&format!("  trip {trip_id}"));
    }
    line
}
