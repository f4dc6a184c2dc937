//! `fleetline.toml` configuration.
//!
//! Every key is optional. Precedence, lowest first: built-in defaults, the
//! TOML file, `FLEETLINE_*` environment variables, command line flags.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//! rate_limit = 1200
//!
//! [resolver]
//! freshness_secs = 120
//! utc_offset_minutes = -300
//!
//! [simulator]
//! max_speed_kmh = 60.0
//! jitter = { seed = 7 }
//!
//! [stream]
//! default_interval_ms = 3000
//!
//! [cache]
//! backend = "disk"
//! dir = "/var/cache/fleetline"
//!
//! [simulation]
//! autostart = true
//! tick_ms = 5000
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fleetline_core::{
    NoJitter, ScheduleSimulator, SeededJitter, SpeedJitter, UniformJitter, DEFAULT_MAX_SPEED_KMH,
};
use fleetline_engine::{CacheConfig, HubConfig, ResolverConfig};
use serde::Deserialize;
use time::UtcOffset;

/// Environment variable overriding `server.port`.
pub(crate) const ENV_PORT: &str = "FLEETLINE_PORT";
/// Environment variable overriding `server.rate_limit`.
pub(crate) const ENV_RATE_LIMIT: &str = "FLEETLINE_RATE_LIMIT";

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("could not read '{path}': {message}")]
    Read { path: PathBuf, message: String },

    #[error("could not parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid value for {name}: '{value}'")]
    Env { name: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Config {
    pub server: ServerSection,
    pub resolver: ResolverSection,
    pub simulator: SimulatorSection,
    pub stream: StreamSection,
    pub cache: CacheConfig,
    pub simulation: SimulationSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ServerSection {
    pub port: u16,
    /// Requests per minute per client IP.
    pub rate_limit: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 8080,
            rate_limit: 1200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ResolverSection {
    pub freshness_secs: u64,
    /// Offset of the timezone schedules are written in.
    pub utc_offset_minutes: i32,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            freshness_secs: 120,
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum JitterMode {
    Random,
    None,
}

/// `jitter = "random"`, `jitter = "none"` or `jitter = { seed = N }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum JitterSetting {
    Mode(JitterMode),
    Seeded { seed: u64 },
}

impl Default for JitterSetting {
    fn default() -> Self {
        JitterSetting::Mode(JitterMode::Random)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct SimulatorSection {
    pub max_speed_kmh: f64,
    pub jitter: JitterSetting,
}

impl Default for SimulatorSection {
    fn default() -> Self {
        Self {
            max_speed_kmh: DEFAULT_MAX_SPEED_KMH,
            jitter: JitterSetting::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct StreamSection {
    pub default_interval_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            default_interval_ms: 3000,
            min_interval_ms: 500,
            max_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct SimulationSection {
    pub autostart: bool,
    pub tick_ms: u64,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            autostart: false,
            tick_ms: 5000,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl Config {
    /// Load `path` if given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    })?;
                Self::parse(&content).map_err(|message| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message,
                })?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Apply `FLEETLINE_*` overrides read through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_PORT) {
            self.server.port = value.trim().parse().map_err(|_| ConfigError::Env {
                name: ENV_PORT,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ENV_RATE_LIMIT) {
            self.server.rate_limit = value.trim().parse().map_err(|_| ConfigError::Env {
                name: ENV_RATE_LIMIT,
                value: value.clone(),
            })?;
        }
        Ok(())
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let stream = &self.stream;
        if stream.min_interval_ms == 0
            || stream.min_interval_ms > stream.max_interval_ms
            || !(stream.min_interval_ms..=stream.max_interval_ms)
                .contains(&stream.default_interval_ms)
        {
            return Err(ConfigError::Invalid(format!(
                "stream intervals must satisfy 0 < min ({}) <= default ({}) <= max ({})",
                stream.min_interval_ms, stream.default_interval_ms, stream.max_interval_ms
            )));
        }
        if !self.simulator.max_speed_kmh.is_finite() || self.simulator.max_speed_kmh < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "simulator.max_speed_kmh must be a non-negative number, got {}",
                self.simulator.max_speed_kmh
            )));
        }
        if self.simulation.tick_ms == 0 {
            return Err(ConfigError::Invalid(
                "simulation.tick_ms must be positive".to_string(),
            ));
        }
        self.utc_offset()?;
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<UtcOffset, ConfigError> {
        UtcOffset::from_whole_seconds(self.resolver.utc_offset_minutes.saturating_mul(60)).map_err(
            |_| {
                ConfigError::Invalid(format!(
                    "resolver.utc_offset_minutes out of range: {}",
                    self.resolver.utc_offset_minutes
                ))
            },
        )
    }

    pub fn resolver_config(&self) -> Result<ResolverConfig, ConfigError> {
        Ok(ResolverConfig {
            freshness: time::Duration::seconds(
                i64::try_from(self.resolver.freshness_secs).unwrap_or(i64::MAX),
            ),
            utc_offset: self.utc_offset()?,
        })
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            default_interval: Duration::from_millis(self.stream.default_interval_ms),
            min_interval: Duration::from_millis(self.stream.min_interval_ms),
            max_interval: Duration::from_millis(self.stream.max_interval_ms),
        }
    }

    pub fn simulator(&self) -> ScheduleSimulator {
        let jitter: Arc<dyn SpeedJitter> = match self.simulator.jitter {
            JitterSetting::Mode(JitterMode::Random) => Arc::new(UniformJitter::default()),
            JitterSetting::Mode(JitterMode::None) => Arc::new(NoJitter),
            JitterSetting::Seeded { seed } => Arc::new(SeededJitter::new(seed)),
        };
        ScheduleSimulator::new(self.simulator.max_speed_kmh, jitter)
    }

    pub fn simulation_tick(&self) -> Duration {
        Duration::from_millis(self.simulation.tick_ms)
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
