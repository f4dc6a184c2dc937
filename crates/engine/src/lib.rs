//! fleetline-engine: the stateful half of the fleet position engine.
//!
//! - [`directory`] -- read-only lookups against fleet administration data
//! - [`cache`] -- pluggable lookup cache (memory or disk, chosen at startup)
//! - [`resolver`] -- fresh real sample first, schedule simulation second
//! - [`hub`] -- one independently timed streaming session per viewer
//! - [`supervisor`] -- owned background task that persists simulated positions
//! - [`clock`] -- wall-clock source, replaceable in tests

pub mod cache;
pub mod clock;
pub mod directory;
pub mod hub;
pub mod resolver;
pub mod supervisor;

pub use cache::{connect_cache, CacheBackendKind, CacheConfig, DiskCache, LookupCache, MemoryCache};
pub use clock::{Clock, FixedClock, SystemClock};
pub use directory::{FleetDirectory, FleetDocument, JsonDirectory};
pub use hub::{DistributionHub, HubConfig, SessionInfo, Snapshot, Subscription, SubscriptionFilter};
pub use resolver::{PositionResolver, ResolverConfig};
pub use supervisor::{SimulationSupervisor, StepReport};
