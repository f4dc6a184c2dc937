//! Per-viewer streaming sessions.
//!
//! Every [`Subscription`] is driven by its own timer task. A session pushes
//! a snapshot as soon as it opens, then one per interval. Ticks within a
//! session are serialized: a slow resolve delays that session only, and
//! ticks missed meanwhile are skipped rather than queued.
//!
//! Dropping the [`Subscription`] cancels its task and removes it from the
//! session registry before `drop` returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleetline_core::{FleetError, ResolvedPosition};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::resolver::PositionResolver;

/// Snapshots buffered per session before the session waits on its viewer.
const SESSION_BUFFER: usize = 4;

/// Which vehicles a session reports on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum SubscriptionFilter {
    /// Every vehicle currently in `active` status.
    All,
    Vehicle(String),
    /// The single vehicle bound to the trip.
    Trip(String),
}

impl SubscriptionFilter {
    /// Build a filter from optional request parameters.
    ///
    /// Supplying both a vehicle and a trip is `InvalidArgument`.
    pub fn from_params(
        vehicle_id: Option<String>,
        trip_id: Option<String>,
    ) -> Result<Self, FleetError> {
        let vehicle_id = vehicle_id.filter(|v| !v.is_empty());
        let trip_id = trip_id.filter(|t| !t.is_empty());
        match (vehicle_id, trip_id) {
            (Some(_), Some(_)) => Err(FleetError::invalid_argument(
                "vehicleId and tripId are mutually exclusive",
            )),
            (Some(vehicle), None) => Ok(SubscriptionFilter::Vehicle(vehicle)),
            (None, Some(trip)) => Ok(SubscriptionFilter::Trip(trip)),
            (None, None) => Ok(SubscriptionFilter::All),
        }
    }
}

/// Interval bounds for streaming sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    pub default_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_millis(3000),
            min_interval: Duration::from_millis(500),
            max_interval: Duration::from_millis(60_000),
        }
    }
}

impl HubConfig {
    /// The requested interval, or the default when none was given.
    pub fn validate_interval(&self, interval_ms: Option<u64>) -> Result<Duration, FleetError> {
        let interval = match interval_ms {
            None => return Ok(self.default_interval),
            Some(ms) => Duration::from_millis(ms),
        };
        if interval < self.min_interval || interval > self.max_interval {
            return Err(FleetError::invalid_argument(format!(
                "intervalMs must be between {} and {}, got {}",
                self.min_interval.as_millis(),
                self.max_interval.as_millis(),
                interval.as_millis()
            )));
        }
        Ok(interval)
    }
}

/// One pushed batch of resolved positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub positions: Vec<ResolvedPosition>,
}

/// Registry entry for a live session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: u64,
    pub filter: SubscriptionFilter,
    pub interval_ms: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub opened_at: OffsetDateTime,
}

struct HubInner {
    resolver: Arc<PositionResolver>,
    clock: Arc<dyn Clock>,
    config: HubConfig,
    sessions: Mutex<HashMap<u64, SessionInfo>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl HubInner {
    fn release(&self, id: u64) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    async fn snapshot(&self, filter: &SubscriptionFilter) -> Snapshot {
        let now = self.clock.now();
        let positions = match self.vehicle_set(filter).await {
            Ok(ids) => match self.resolver.resolve_many(&ids, now).await {
                Ok(positions) => positions,
                Err(e) => {
                    warn!(error = %e, "snapshot resolution failed");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(?filter, error = %e, "snapshot filter lookup failed");
                Vec::new()
            }
        };
        Snapshot {
            timestamp: now,
            positions,
        }
    }

    async fn vehicle_set(&self, filter: &SubscriptionFilter) -> Result<Vec<String>, FleetError> {
        let directory = self.resolver.directory();
        match filter {
            SubscriptionFilter::Vehicle(id) => Ok(vec![id.clone()]),
            SubscriptionFilter::Trip(id) => Ok(vec![directory.trip(id).await?.vehicle_id]),
            SubscriptionFilter::All => Ok(directory
                .active_vehicles()
                .await?
                .into_iter()
                .map(|v| v.id)
                .collect()),
        }
    }
}

/// Opens and tracks streaming sessions.
#[derive(Clone)]
pub struct DistributionHub {
    inner: Arc<HubInner>,
}

impl DistributionHub {
    pub fn new(resolver: Arc<PositionResolver>, clock: Arc<dyn Clock>, config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                resolver,
                clock,
                config,
                sessions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Open a session. `interval_ms` is validated against the hub bounds.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(
        &self,
        filter: SubscriptionFilter,
        interval_ms: Option<u64>,
    ) -> Result<Subscription, FleetError> {
        let interval = self.inner.config.validate_interval(interval_ms)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.inner.shutdown.child_token();
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);

        let info = SessionInfo {
            id,
            filter: filter.clone(),
            interval_ms: interval.as_millis() as u64,
            opened_at: self.inner.clock.now(),
        };
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, info);
        info!(session = id, ?filter, interval_ms = interval.as_millis() as u64, "session opened");

        tokio::spawn(run_session(
            Arc::clone(&self.inner),
            id,
            filter,
            interval,
            tx,
            token.clone(),
        ));

        Ok(Subscription {
            id,
            interval,
            receiver: rx,
            guard: SessionGuard {
                id,
                token,
                inner: Arc::clone(&self.inner),
            },
        })
    }

    /// Resolve a filter once, outside any session.
    pub async fn snapshot(&self, filter: &SubscriptionFilter) -> Snapshot {
        self.inner.snapshot(filter).await
    }

    pub fn active_sessions(&self) -> usize {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Registry entries ordered by session id.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// Cancel every session. Their subscriptions then yield `None`.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

async fn run_session(
    inner: Arc<HubInner>,
    id: u64,
    filter: SubscriptionFilter,
    interval: Duration,
    tx: mpsc::Sender<Snapshot>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let snapshot = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            snapshot = inner.snapshot(&filter) => snapshot,
        };
        let delivered = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = tx.send(snapshot) => result.is_ok(),
        };
        if !delivered {
            break;
        }
        sent += 1;
    }

    if inner.release(id) {
        info!(session = id, sent, "session closed");
    } else {
        debug!(session = id, sent, "session task finished");
    }
}

struct SessionGuard {
    id: u64,
    token: CancellationToken,
    inner: Arc<HubInner>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.token.cancel();
        if self.inner.release(self.id) {
            info!(session = self.id, "session closed by viewer");
        }
    }
}

/// A viewer's handle on one streaming session.
pub struct Subscription {
    id: u64,
    interval: Duration,
    receiver: mpsc::Receiver<Snapshot>,
    guard: SessionGuard,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The next snapshot, or `None` once the session has ended.
    pub async fn next(&mut self) -> Option<Snapshot> {
        if self.guard.token.is_cancelled() {
            return None;
        }
        self.receiver.recv().await
    }

    /// Consume the subscription as a stream. Dropping the stream closes
    /// the session.
    pub fn into_stream(self) -> impl Stream<Item = Snapshot> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            let snapshot = subscription.next().await?;
            Some((snapshot, subscription))
        })
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
