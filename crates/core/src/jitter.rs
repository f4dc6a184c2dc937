//! Speed realism strategies.
//!
//! The simulator multiplies the raw segment speed by a factor drawn from a
//! [`SpeedJitter`]. Production uses [`UniformJitter`]; tests inject
//! [`NoJitter`] or a [`SeededJitter`] for reproducible output.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Lower bound of the default realism multiplier.
pub const JITTER_MIN: f64 = 0.8;
/// Upper bound of the default realism multiplier.
pub const JITTER_MAX: f64 = 1.2;

/// Source of speed multipliers.
pub trait SpeedJitter: Send + Sync {
    /// Next multiplier to apply to a raw segment speed.
    fn factor(&self) -> f64;
}

/// Always 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl SpeedJitter for NoJitter {
    fn factor(&self) -> f64 {
        1.0
    }
}

/// Fresh draw from the thread RNG on every call.
#[derive(Debug, Clone, Copy)]
pub struct UniformJitter {
    min: f64,
    max: f64,
}

impl UniformJitter {
    pub fn new(min: f64, max: f64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self { min, max }
    }
}

impl Default for UniformJitter {
    fn default() -> Self {
        Self::new(JITTER_MIN, JITTER_MAX)
    }
}

impl SpeedJitter for UniformJitter {
    fn factor(&self) -> f64 {
        if self.min == self.max {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

/// Reproducible sequence of multipliers from a fixed seed.
pub struct SeededJitter {
    rng: Mutex<StdRng>,
    min: f64,
    max: f64,
}

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            min: JITTER_MIN,
            max: JITTER_MAX,
        }
    }
}

impl SpeedJitter for SeededJitter {
    fn factor(&self) -> f64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(self.min..=self.max),
            // A panic elsewhere poisoned the lock; the generator state is still usable.
            Err(poisoned) => poisoned.into_inner().gen_range(self.min..=self.max),
        }
    }
}
