//! Great-circle math on latitude/longitude pairs.
//!
//! Distances use the haversine formula on a spherical Earth of radius
//! [`EARTH_RADIUS_KM`]. Interpolation is planar: at city-block segment
//! lengths the error against a true geodesic is negligible.

use serde::{Deserialize, Serialize};

use crate::error::FleetError;

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;
const RAD_TO_DEG: f64 = 180.0 / std::f64::consts::PI;

/// A WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Build a validated point.
    ///
    /// Returns `FleetError::InvalidCoordinates` when latitude is outside
    /// [-90, 90], longitude is outside [-180, 180], or either is not finite.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, FleetError> {
        let point = Coordinates {
            latitude,
            longitude,
        };
        if point.is_valid() {
            Ok(point)
        } else {
            Err(FleetError::InvalidCoordinates {
                latitude,
                longitude,
            })
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Great-circle distance between two points in kilometers.
pub fn distance(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude * DEG_TO_RAD;
    let lat2 = b.latitude * DEG_TO_RAD;
    let delta_lat = (b.latitude - a.latitude) * DEG_TO_RAD;
    let delta_lon = (b.longitude - a.longitude) * DEG_TO_RAD;

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points.
    let c = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Initial bearing from `a` towards `b`, in degrees clockwise from north.
///
/// Always within `[0, 360)`. Identical points yield 0.
pub fn bearing(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude * DEG_TO_RAD;
    let lat2 = b.latitude * DEG_TO_RAD;
    let delta_lon = (b.longitude - a.longitude) * DEG_TO_RAD;

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();

    normalize_degrees(y.atan2(x) * RAD_TO_DEG)
}

/// Linear interpolation of latitude and longitude independently.
///
/// `fraction` is not clamped here; callers pass a value in `[0, 1]`.
pub fn lerp(a: Coordinates, b: Coordinates, fraction: f64) -> Coordinates {
    Coordinates {
        latitude: a.latitude + (b.latitude - a.latitude) * fraction,
        longitude: a.longitude + (b.longitude - a.longitude) * fraction,
    }
}

/// Fold any angle into `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let folded = degrees.rem_euclid(360.0);
    // rem_euclid can return exactly 360.0 for tiny negative inputs.
    if folded >= 360.0 {
        0.0
    } else {
        folded
    }
}
