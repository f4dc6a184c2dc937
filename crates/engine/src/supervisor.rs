//! Background simulation driver.
//!
//! A [`SimulationSupervisor`] owns at most one background task. While it
//! runs, every tick persists a simulated sample for each active vehicle
//! with an active trip, which makes demo fleets move without GPS hardware.
//! Supervisors share no global state; several can run side by side.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleetline_core::FleetError;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::resolver::PositionResolver;

/// Default period between simulation ticks.
pub const DEFAULT_TICK: Duration = Duration::from_secs(5);

/// Outcome of one pass over the fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub recorded: usize,
    pub skipped: usize,
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SimulationSupervisor {
    resolver: Arc<PositionResolver>,
    clock: Arc<dyn Clock>,
    tick: Duration,
    running: Mutex<Option<Running>>,
    ticks: Arc<AtomicU64>,
}

impl SimulationSupervisor {
    pub fn new(resolver: Arc<PositionResolver>, clock: Arc<dyn Clock>, tick: Duration) -> Self {
        Self {
            resolver,
            clock,
            tick: tick.max(Duration::from_millis(1)),
            running: Mutex::new(None),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Completed ticks since construction.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Start the background task. Returns `false` if it was already running.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(drive(
            Arc::clone(&self.resolver),
            Arc::clone(&self.clock),
            self.tick,
            Arc::clone(&self.ticks),
            token.clone(),
        ));
        *running = Some(Running { token, handle });
        info!(tick_ms = self.tick.as_millis() as u64, "simulation started");
        true
    }

    /// Stop the background task and wait for it to finish.
    /// Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let taken = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(Running { token, handle }) = taken else {
            return false;
        };
        token.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "simulation task ended abnormally");
        }
        info!("simulation stopped");
        true
    }

    /// Run one pass immediately, independent of the background task.
    pub async fn step_all(&self) -> Result<StepReport, FleetError> {
        step_all(&self.resolver, self.clock.as_ref()).await
    }
}

impl Drop for SimulationSupervisor {
    fn drop(&mut self) {
        if let Some(running) = self
            .running
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            running.token.cancel();
        }
    }
}

async fn drive(
    resolver: Arc<PositionResolver>,
    clock: Arc<dyn Clock>,
    tick: Duration,
    ticks: Arc<AtomicU64>,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            outcome = step_all(&resolver, clock.as_ref()) => outcome,
        };
        match outcome {
            Ok(report) => debug!(recorded = report.recorded, skipped = report.skipped, "simulation tick"),
            Err(e) => warn!(error = %e, "simulation tick failed"),
        }
        ticks.fetch_add(1, Ordering::Relaxed);
    }
}

async fn step_all(resolver: &PositionResolver, clock: &dyn Clock) -> Result<StepReport, FleetError> {
    let now = clock.now();
    let vehicles = resolver.directory().active_vehicles().await?;
    let mut report = StepReport::default();
    for vehicle in vehicles {
        match resolver.simulate_step(&vehicle.id, now).await {
            Ok(_) => report.recorded += 1,
            Err(FleetError::NotFound(reason)) => {
                debug!(vehicle_id = %vehicle.id, %reason, "nothing to simulate");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(vehicle_id = %vehicle.id, error = %e, "simulate step failed");
                report.skipped += 1;
            }
        }
    }
    Ok(report)
}
