//! Viewer-side reconnection.
//!
//! ```text
//! Idle -> Connecting -> Open
//!            ^    |       |
//!            |    v       v  (transport error or server close)
//!            +-- Backoff <+
//!                   |
//!                   v  (retries exhausted)
//!                 Failed
//! ```
//!
//! The initial connection is not a retry. Each failure schedules retry `n`
//! (0-based) after `base_delay * 2^n`; once `max_attempts` retries have
//! failed the controller settles in [`ConnectionState::Failed`] and stops.
//! The count resets on the first snapshot of a connection, not on the open
//! itself, so a server that accepts and immediately drops still exhausts
//! the retries. A connection that stays silent for `idle_timeout` counts as
//! failed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::TransportError;
use crate::transport::{Snapshot, Transport};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Longest wait for a snapshot on an open stream before it is treated as
/// dead. Well above the server's default cadence.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// Snapshots buffered between the session task and the consumer.
const SNAPSHOT_BUFFER: usize = 16;

/// Exponential retry schedule with a bounded attempt count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
        }
    }

    /// Record a failure. Returns the delay before the next attempt, or
    /// `None` when no attempts remain.
    pub fn on_failure(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let delay = self.base.saturating_mul(2u32.saturating_pow(self.attempts));
        self.attempts += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Retries scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_attempts: u32,
    /// Longest gap between snapshots before the connection is dropped.
    pub idle_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    /// `attempt` is 0 for the initial connection, then the retry number.
    Connecting { attempt: u32 },
    Open,
    Backoff { attempt: u32, delay: Duration },
    /// Terminal until a manual reconnect.
    Failed { attempts: u32, reason: String },
}

impl ConnectionState {
    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed { .. })
    }
}

struct Session {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns at most one streaming session and keeps it alive.
pub struct ReconnectController {
    transport: Arc<dyn Transport>,
    config: ReconnectConfig,
    state_tx: watch::Sender<ConnectionState>,
    snapshots_tx: mpsc::Sender<Snapshot>,
    session: Option<Session>,
}

impl ReconnectController {
    /// Returns the controller and the receiving end of its snapshot feed.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ReconnectConfig,
    ) -> (Self, mpsc::Receiver<Snapshot>) {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (snapshots_tx, snapshots_rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let controller = Self {
            transport,
            config,
            state_tx,
            snapshots_tx,
            session: None,
        };
        (controller, snapshots_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Start a session unless one is already live. A controller that has
    /// `Failed` stays failed; use [`reconnect`](Self::reconnect).
    pub fn connect(&mut self) {
        if self.session.is_some() {
            return;
        }
        self.spawn_session();
    }

    /// Drop any current session, reset the attempt counter and connect
    /// immediately.
    pub async fn reconnect(&mut self) {
        self.stop_session().await;
        info!("manual reconnect");
        self.spawn_session();
    }

    /// Cancel any pending retry, close any open transport and return to
    /// `Idle`. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        self.stop_session().await;
        self.state_tx.send_replace(ConnectionState::Idle);
    }

    fn spawn_session(&mut self) {
        let token = CancellationToken::new();
        self.state_tx
            .send_replace(ConnectionState::Connecting { attempt: 0 });
        let handle = tokio::spawn(run_session(
            Arc::clone(&self.transport),
            Backoff::new(self.config.base_delay, self.config.max_attempts),
            self.config.idle_timeout,
            self.state_tx.clone(),
            self.snapshots_tx.clone(),
            token.clone(),
        ));
        self.session = Some(Session { token, handle });
    }

    async fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.token.cancel();
            if let Err(e) = session.handle.await {
                warn!(error = %e, "session task ended abnormally");
            }
        }
    }
}

impl Drop for ReconnectController {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.token.cancel();
        }
    }
}

enum Outcome {
    Failed(TransportError),
    ConsumerGone,
}

async fn run_session(
    transport: Arc<dyn Transport>,
    mut backoff: Backoff,
    idle_timeout: Duration,
    state_tx: watch::Sender<ConnectionState>,
    snapshots_tx: mpsc::Sender<Snapshot>,
    token: CancellationToken,
) {
    loop {
        state_tx.send_replace(ConnectionState::Connecting {
            attempt: backoff.attempts(),
        });

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            outcome = stream_once(transport.as_ref(), &mut backoff, idle_timeout, &state_tx, &snapshots_tx) => outcome,
        };

        let err = match outcome {
            Outcome::ConsumerGone => {
                state_tx.send_replace(ConnectionState::Idle);
                return;
            }
            Outcome::Failed(err) => err,
        };

        match backoff.on_failure() {
            Some(delay) => {
                warn!(error = %err, attempt = backoff.attempts(), delay_ms = delay.as_millis() as u64, "stream lost, retrying");
                state_tx.send_replace(ConnectionState::Backoff {
                    attempt: backoff.attempts(),
                    delay,
                });
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                error!(error = %err, attempts = backoff.attempts(), "giving up on stream");
                state_tx.send_replace(ConnectionState::Failed {
                    attempts: backoff.attempts(),
                    reason: err.to_string(),
                });
                return;
            }
        }
    }
}

/// Open one connection and forward snapshots until it fails or goes quiet
/// for longer than `idle_timeout`.
async fn stream_once(
    transport: &dyn Transport,
    backoff: &mut Backoff,
    idle_timeout: Duration,
    state_tx: &watch::Sender<ConnectionState>,
    snapshots_tx: &mpsc::Sender<Snapshot>,
) -> Outcome {
    let mut stream = match transport.open().await {
        Ok(stream) => stream,
        Err(e) => return Outcome::Failed(e),
    };
    state_tx.send_replace(ConnectionState::Open);
    info!("stream open");

    loop {
        let next = match tokio::time::timeout(idle_timeout, stream.next_snapshot()).await {
            Ok(next) => next,
            Err(_) => {
                return Outcome::Failed(TransportError::Io(format!(
                    "no snapshot for {}s",
                    idle_timeout.as_secs()
                )))
            }
        };
        match next {
            Ok(Some(snapshot)) => {
                backoff.reset();
                if snapshots_tx.send(snapshot).await.is_err() {
                    return Outcome::ConsumerGone;
                }
            }
            Ok(None) => return Outcome::Failed(TransportError::Closed),
            Err(e) => return Outcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SnapshotStream;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use time::macros::datetime;
    use tokio::time::Instant;

    enum Script {
        Refuse,
        Emit(usize),
        Hang,
        /// Accept, then fail the first read.
        Drop,
    }

    struct ScriptedTransport {
        script: Mutex<VecDeque<Script>>,
        opens: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn with(script: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                opens: Mutex::new(Vec::new()),
            })
        }

        fn opens(&self) -> Vec<Instant> {
            self.opens.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct CannedStream {
        remaining: usize,
        hang: bool,
        fail: bool,
    }

    #[async_trait]
    impl SnapshotStream for CannedStream {
        async fn next_snapshot(&mut self) -> Result<Option<Snapshot>, TransportError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(TransportError::Io("connection reset".to_string()));
            }
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(Snapshot {
                timestamp: datetime!(2026-10-17 06:15 UTC),
                positions: Vec::new(),
            }))
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self) -> Result<Box<dyn SnapshotStream>, TransportError> {
            self.opens.lock().unwrap().push(Instant::now());
            let next = self.script.lock().unwrap().pop_front();
            match next.unwrap_or(Script::Refuse) {
                Script::Refuse => Err(TransportError::Connect("refused".to_string())),
                Script::Emit(n) => Ok(Box::new(CannedStream {
                    remaining: n,
                    ..CannedStream::default()
                })),
                Script::Hang => Ok(Box::new(CannedStream {
                    hang: true,
                    ..CannedStream::default()
                })),
                Script::Drop => Ok(Box::new(CannedStream {
                    fail: true,
                    ..CannedStream::default()
                })),
            }
        }
    }

    async fn wait_for(
        rx: &mut watch::Receiver<ConnectionState>,
        f: impl FnMut(&ConnectionState) -> bool,
    ) -> ConnectionState {
        rx.wait_for(f).await.unwrap().clone()
    }

    #[test]
    fn backoff_doubles_and_exhausts() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.on_failure())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32]);
        assert_eq!(backoff.on_failure(), None);
        backoff.reset();
        assert_eq!(backoff.on_failure(), Some(Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_retries_then_fails() {
        let transport = ScriptedTransport::with(Vec::new());
        let (mut controller, _snapshots) =
            ReconnectController::new(transport.clone(), ReconnectConfig::default());
        let mut state = controller.watch_state();

        controller.connect();
        let failed = wait_for(&mut state, ConnectionState::is_failed).await;
        assert_eq!(
            failed,
            ConnectionState::Failed {
                attempts: 5,
                reason: "connect failed: refused".to_string()
            }
        );

        let opens = transport.opens();
        assert_eq!(opens.len(), 6);
        let gaps: Vec<u64> = opens.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![2, 4, 8, 16, 32]);

        // No sixth retry, however long we wait.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.opens().len(), 6);
        assert!(controller.state().is_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_resets_counter() {
        let transport = ScriptedTransport::with(Vec::new());
        let (mut controller, _snapshots) =
            ReconnectController::new(transport.clone(), ReconnectConfig::default());
        let mut state = controller.watch_state();
        controller.connect();
        wait_for(&mut state, ConnectionState::is_failed).await;

        let before = Instant::now();
        controller.reconnect().await;
        let backoff = wait_for(&mut state, |s| matches!(s, ConnectionState::Backoff { .. })).await;
        assert_eq!(
            backoff,
            ConnectionState::Backoff {
                attempt: 1,
                delay: Duration::from_secs(2)
            }
        );
        let opens = transport.opens();
        assert_eq!(opens.len(), 7);
        assert_eq!(opens[6], before);
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_snapshots_and_recovers_after_close() {
        let transport = ScriptedTransport::with(vec![Script::Emit(2), Script::Refuse, Script::Hang]);
        let (mut controller, mut snapshots) =
            ReconnectController::new(transport.clone(), ReconnectConfig::default());
        let mut state = controller.watch_state();
        controller.connect();

        assert!(snapshots.recv().await.is_some());
        assert!(snapshots.recv().await.is_some());

        // Clean close, one refusal, then a live stream.
        wait_for(&mut state, |s| {
            matches!(s, ConnectionState::Backoff { attempt: 2, .. })
        })
        .await;
        wait_for(&mut state, |s| *s == ConnectionState::Open).await;
        let opens = transport.opens();
        assert_eq!(opens.len(), 3);
        assert_eq!((opens[1] - opens[0]).as_secs(), 2);
        assert_eq!((opens[2] - opens[1]).as_secs(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn first_snapshot_resets_attempts() {
        let transport = ScriptedTransport::with(vec![Script::Refuse, Script::Emit(1), Script::Hang]);
        let (mut controller, _snapshots) =
            ReconnectController::new(transport.clone(), ReconnectConfig::default());
        let mut state = controller.watch_state();
        controller.connect();

        wait_for(&mut state, |s| *s == ConnectionState::Open).await;
        let opens = transport.opens();
        assert_eq!(opens.len(), 3);
        // Refused, then a snapshot and a close: both retries wait the base delay.
        assert_eq!((opens[1] - opens[0]).as_secs(), 2);
        assert_eq!((opens[2] - opens[1]).as_secs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_then_dropped_still_exhausts_retries() {
        let transport = ScriptedTransport::with((0..10).map(|_| Script::Drop).collect());
        let (mut controller, _snapshots) =
            ReconnectController::new(transport.clone(), ReconnectConfig::default());
        let mut state = controller.watch_state();
        controller.connect();

        let failed = wait_for(&mut state, ConnectionState::is_failed).await;
        assert_eq!(
            failed,
            ConnectionState::Failed {
                attempts: 5,
                reason: "stream read failed: connection reset".to_string()
            }
        );
        let opens = transport.opens();
        assert_eq!(opens.len(), 6);
        let gaps: Vec<u64> = opens.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![2, 4, 8, 16, 32]);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(transport.opens().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stream_is_dropped_after_idle_timeout() {
        let transport = ScriptedTransport::with(vec![Script::Hang, Script::Hang]);
        let config = ReconnectConfig {
            idle_timeout: Duration::from_secs(10),
            ..ReconnectConfig::default()
        };
        let (mut controller, _snapshots) = ReconnectController::new(transport.clone(), config);
        let mut state = controller.watch_state();
        controller.connect();

        wait_for(&mut state, |s| *s == ConnectionState::Open).await;
        let backoff = wait_for(&mut state, |s| matches!(s, ConnectionState::Backoff { .. })).await;
        assert_eq!(
            backoff,
            ConnectionState::Backoff {
                attempt: 1,
                delay: Duration::from_secs(2)
            }
        );
        wait_for(&mut state, |s| *s == ConnectionState::Open).await;
        let opens = transport.opens();
        assert_eq!(opens.len(), 2);
        assert_eq!((opens[1] - opens[0]).as_secs(), 12);
        controller.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent_and_cancels_retry() {
        let transport = ScriptedTransport::with(Vec::new());
        let (mut controller, _snapshots) =
            ReconnectController::new(transport.clone(), ReconnectConfig::default());
        let mut state = controller.watch_state();
        controller.connect();
        wait_for(&mut state, |s| matches!(s, ConnectionState::Backoff { .. })).await;

        controller.disconnect().await;
        controller.disconnect().await;
        assert_eq!(controller.state(), ConnectionState::Idle);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.opens().len(), 1);
        assert_eq!(controller.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_live_is_a_no_op() {
        let transport = ScriptedTransport::with(vec![Script::Hang]);
        let (mut controller, _snapshots) =
            ReconnectController::new(transport.clone(), ReconnectConfig::default());
        let mut state = controller.watch_state();
        controller.connect();
        wait_for(&mut state, |s| *s == ConnectionState::Open).await;
        controller.connect();
        tokio::task::yield_now().await;
        assert_eq!(transport.opens().len(), 1);
        controller.disconnect().await;
    }
}
