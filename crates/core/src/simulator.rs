//! Schedule interpolation.
//!
//! Given a validated [`Schedule`] and a minute of the day, the simulator
//! places the vehicle on the segment whose scheduled window contains that
//! minute. Position, heading and progress are pure functions of the
//! inputs; speed additionally passes through the injected [`SpeedJitter`].

use std::sync::Arc;

use crate::geo::{self, Coordinates};
use crate::jitter::{SpeedJitter, UniformJitter};
use crate::schedule::Schedule;

/// Speed ceiling applied after jitter, km/h.
pub const DEFAULT_MAX_SPEED_KMH: f64 = 60.0;

/// Output of one simulation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedPosition {
    pub coordinates: Coordinates,
    /// km/h, within `[0, max_speed]`.
    pub speed: f64,
    /// Degrees in `[0, 360)`.
    pub heading: f64,
    /// Percent in `[0, 100]`.
    pub progress: f64,
    /// Index of the segment being travelled, `None` when stationary at an end.
    pub segment: Option<usize>,
}

/// Interpolates vehicle positions along scheduled routes.
#[derive(Clone)]
pub struct ScheduleSimulator {
    max_speed_kmh: f64,
    jitter: Arc<dyn SpeedJitter>,
}

impl std::fmt::Debug for ScheduleSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleSimulator")
            .field("max_speed_kmh", &self.max_speed_kmh)
            .finish_non_exhaustive()
    }
}

impl Default for ScheduleSimulator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SPEED_KMH, Arc::new(UniformJitter::default()))
    }
}

impl ScheduleSimulator {
    pub fn new(max_speed_kmh: f64, jitter: Arc<dyn SpeedJitter>) -> Self {
        let max_speed_kmh = if max_speed_kmh.is_finite() {
            max_speed_kmh.max(0.0)
        } else {
            DEFAULT_MAX_SPEED_KMH
        };
        Self {
            max_speed_kmh,
            jitter,
        }
    }

    pub fn max_speed_kmh(&self) -> f64 {
        self.max_speed_kmh
    }

    /// Position of a vehicle following `schedule` at `now_minutes` past midnight.
    pub fn simulate(&self, schedule: &Schedule, now_minutes: f64) -> SimulatedPosition {
        let first = schedule.first();
        let last = schedule.last();

        // Still waiting at the first stop, including the departure minute itself.
        if now_minutes <= first.scheduled_minutes {
            return stationary(first.coordinates, 0.0);
        }

        let segment = match schedule.segment_at(now_minutes) {
            Some(i) => i,
            // At or past the final stop (NaN also lands here).
            None => return stationary(last.coordinates, 100.0),
        };

        let stops = schedule.stops();
        let from = &stops[segment];
        let to = &stops[segment + 1];
        let span_minutes = to.scheduled_minutes - from.scheduled_minutes;
        let fraction = ((now_minutes - from.scheduled_minutes) / span_minutes).clamp(0.0, 1.0);

        let coordinates = geo::lerp(from.coordinates, to.coordinates, fraction);
        let heading = geo::bearing(from.coordinates, to.coordinates);
        let raw_speed = geo::distance(from.coordinates, to.coordinates) / (span_minutes / 60.0);
        let progress = (segment as f64 + fraction) / (stops.len() - 1) as f64 * 100.0;

        SimulatedPosition {
            coordinates,
            speed: self.realistic_speed(raw_speed),
            heading,
            progress: progress.clamp(0.0, 100.0),
            segment: Some(segment),
        }
    }

    /// Schedule progress only, without touching the jitter source.
    pub fn progress(&self, schedule: &Schedule, now_minutes: f64) -> f64 {
        if now_minutes <= schedule.first().scheduled_minutes {
            return 0.0;
        }
        match schedule.segment_at(now_minutes) {
            Some(i) => {
                let stops = schedule.stops();
                let span = stops[i + 1].scheduled_minutes - stops[i].scheduled_minutes;
                let fraction = ((now_minutes - stops[i].scheduled_minutes) / span).clamp(0.0, 1.0);
                ((i as f64 + fraction) / (stops.len() - 1) as f64 * 100.0).clamp(0.0, 100.0)
            }
            None => 100.0,
        }
    }

    fn realistic_speed(&self, raw_speed: f64) -> f64 {
        let jittered = raw_speed * self.jitter.factor();
        if !jittered.is_finite() {
            return 0.0;
        }
        jittered.clamp(0.0, self.max_speed_kmh)
    }
}

fn stationary(coordinates: Coordinates, progress: f64) -> SimulatedPosition {
    SimulatedPosition {
        coordinates,
        speed: 0.0,
        heading: 0.0,
        progress,
        segment: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jitter::{NoJitter, SeededJitter};
    use crate::schedule::ScheduledStop;

    fn stop(id: &str, minutes: f64, latitude: f64, longitude: f64) -> ScheduledStop {
        ScheduledStop {
            stop_id: id.to_string(),
            name: None,
            coordinates: Coordinates {
                latitude,
                longitude,
            },
            scheduled_minutes: minutes,
        }
    }

    fn two_stop_route() -> Schedule {
        // A@06:00, B@06:30
        Schedule::new(
            "r1",
            vec![
                stop("A", 360.0, 40.7000, -74.0000),
                stop("B", 390.0, 40.7100, -73.9900),
            ],
        )
        .unwrap()
    }

    fn exact() -> ScheduleSimulator {
        ScheduleSimulator::new(DEFAULT_MAX_SPEED_KMH, Arc::new(NoJitter))
    }

    #[test]
    fn at_first_scheduled_time_sits_on_first_stop() {
        let route = two_stop_route();
        let p = exact().simulate(&route, 360.0);
        assert_eq!(p.coordinates, route.first().coordinates);
        assert_eq!((p.speed, p.heading, p.progress), (0.0, 0.0, 0.0));
    }

    #[test]
    fn before_first_stop_is_stationary() {
        let route = two_stop_route();
        let p = exact().simulate(&route, 300.0);
        assert_eq!(p.coordinates, route.first().coordinates);
        assert_eq!((p.speed, p.heading, p.progress), (0.0, 0.0, 0.0));
        assert_eq!(p.segment, None);
    }

    #[test]
    fn at_or_after_last_stop_is_stationary() {
        let route = two_stop_route();
        for now in [390.0, 391.0, 1439.0] {
            let p = exact().simulate(&route, now);
            assert_eq!(p.coordinates, route.last().coordinates);
            assert_eq!((p.speed, p.heading, p.progress), (0.0, 0.0, 100.0));
        }
    }

    #[test]
    fn midway_is_arithmetic_midpoint() {
        let route = two_stop_route();
        let p = exact().simulate(&route, 375.0);
        assert!((p.coordinates.latitude - 40.7050).abs() < 1e-12);
        assert!((p.coordinates.longitude - -73.9950).abs() < 1e-12);
        assert_eq!(p.progress, 50.0);
        assert_eq!(p.segment, Some(0));
    }

    #[test]
    fn speed_matches_distance_over_duration_without_jitter() {
        let route = two_stop_route();
        let p = exact().simulate(&route, 375.0);
        let expected = geo::distance(route.first().coordinates, route.last().coordinates) * 2.0;
        assert!((p.speed - expected).abs() < 1e-9);
    }

    #[test]
    fn speed_is_clamped_to_maximum() {
        // ~111 km in one minute.
        let route = Schedule::new(
            "fast",
            vec![stop("A", 0.0, 0.0, 0.0), stop("B", 1.0, 1.0, 0.0)],
        )
        .unwrap();
        let sim = ScheduleSimulator::new(45.0, Arc::new(SeededJitter::new(7)));
        for i in 1..10 {
            let p = sim.simulate(&route, i as f64 / 10.0);
            assert_eq!(p.speed, 45.0);
        }
    }

    #[test]
    fn speed_and_heading_bounds_with_random_jitter() {
        let route = Schedule::new(
            "loop",
            vec![
                stop("A", 360.0, 51.50, -0.12),
                stop("B", 361.0, 51.50, -0.12),
                stop("C", 420.0, 51.40, -0.30),
                stop("D", 600.0, 51.60, 0.10),
            ],
        )
        .unwrap();
        let sim = ScheduleSimulator::default();
        let mut now = 350.0;
        while now < 610.0 {
            let p = sim.simulate(&route, now);
            assert!(p.speed >= 0.0 && p.speed <= sim.max_speed_kmh());
            assert!((0.0..360.0).contains(&p.heading));
            now += 0.7;
        }
    }

    #[test]
    fn progress_is_monotonic() {
        let route = Schedule::new(
            "r",
            vec![
                stop("A", 360.0, 0.0, 0.0),
                stop("B", 370.0, 0.0, 0.1),
                stop("C", 400.0, 0.1, 0.1),
                stop("D", 405.0, 0.1, 0.2),
            ],
        )
        .unwrap();
        let sim = exact();
        let mut previous = -1.0;
        let mut now = 340.0;
        while now <= 420.0 {
            let p = sim.simulate(&route, now);
            assert!(p.progress >= previous, "progress went back at {now}");
            assert_eq!(p.progress, sim.progress(&route, now));
            previous = p.progress;
            now += 0.25;
        }
        assert_eq!(previous, 100.0);
    }

    #[test]
    fn heading_follows_segment() {
        let route = Schedule::new(
            "east",
            vec![stop("A", 0.0, 0.0, 0.0), stop("B", 10.0, 0.0, 0.1)],
        )
        .unwrap();
        let p = exact().simulate(&route, 5.0);
        assert!((p.heading - 90.0).abs() < 1e-6);
    }

    #[test]
    fn zero_length_segment_has_zero_speed() {
        let route = Schedule::new(
            "dwell",
            vec![stop("A", 0.0, 1.0, 1.0), stop("B", 10.0, 1.0, 1.0)],
        )
        .unwrap();
        let p = exact().simulate(&route, 5.0);
        assert_eq!(p.speed, 0.0);
        assert_eq!(p.heading, 0.0);
    }
}
