//! Snapshot transports.
//!
//! A [`Transport`] opens one streaming connection at a time. The
//! reconnection controller owns the policy around it; transports only
//! report failures.

use std::io::{BufRead, BufReader};

use async_trait::async_trait;
use fleetline_core::ResolvedPosition;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::TransportError;
use crate::sse::SseDecoder;

/// Name of the SSE event carrying snapshots.
pub const SNAPSHOT_EVENT: &str = "snapshot";

/// One batch of resolved positions as received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub positions: Vec<ResolvedPosition>,
}

/// An open streaming connection.
#[async_trait]
pub trait SnapshotStream: Send {
    /// The next snapshot; `Ok(None)` when the server ended the stream.
    async fn next_snapshot(&mut self) -> Result<Option<Snapshot>, TransportError>;
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self) -> Result<Box<dyn SnapshotStream>, TransportError>;
}

/// Filter and cadence requested from the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamQuery {
    pub vehicle_id: Option<String>,
    pub trip_id: Option<String>,
    pub interval_ms: Option<u64>,
}

/// SSE over HTTP using a blocking `ureq` reader on the blocking pool.
#[derive(Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
    url: String,
    query: StreamQuery,
}

impl HttpTransport {
    /// `base_url` is the server root, e.g. `http://localhost:8080`.
    pub fn new(base_url: &str, query: StreamQuery) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            url: format!("{}/stream", base_url.trim_end_matches('/')),
            query,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn connect(&self) -> Result<ureq::http::Response<ureq::Body>, TransportError> {
        let mut request = self
            .agent
            .get(&self.url)
            .header("Accept", "text/event-stream");
        if let Some(vehicle_id) = &self.query.vehicle_id {
            request = request.query("vehicleId", vehicle_id);
        }
        if let Some(trip_id) = &self.query.trip_id {
            request = request.query("tripId", trip_id);
        }
        if let Some(interval_ms) = self.query.interval_ms {
            request = request.query("intervalMs", interval_ms.to_string());
        }
        request
            .call()
            .map_err(|e| TransportError::Connect(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self) -> Result<Box<dyn SnapshotStream>, TransportError> {
        let transport = self.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(16);

        tokio::task::spawn_blocking(move || {
            let response = match transport.connect() {
                Ok(response) => {
                    let _ = ready_tx.send(Ok(()));
                    response
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let reader = BufReader::new(response.into_body().into_reader());
            pump_events(reader, &tx);
            debug!(url = %transport.url, "stream reader finished");
        });

        ready_rx
            .await
            .map_err(|_| TransportError::Connect("connection task ended".to_string()))??;
        Ok(Box::new(ChannelStream { rx }))
    }
}

/// Decode SSE lines into snapshots until EOF, a read error, or the
/// receiving side going away. The receiver is only noticed on the next
/// line, which server keep-alives guarantee.
fn pump_events(reader: impl BufRead, tx: &mpsc::Sender<Result<Snapshot, TransportError>>) {
    let mut decoder = SseDecoder::new();
    for line in reader.lines() {
        if tx.is_closed() {
            return;
        }
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                let _ = tx.blocking_send(Err(TransportError::Io(e.to_string())));
                return;
            }
        };
        let Some(event) = decoder.push_line(&line) else {
            continue;
        };
        if event.name() != SNAPSHOT_EVENT {
            continue;
        }
        let parsed = serde_json::from_str::<Snapshot>(&event.data)
            .map_err(|e| TransportError::Decode(e.to_string()));
        if tx.blocking_send(parsed).is_err() {
            return;
        }
    }
}

struct ChannelStream {
    rx: mpsc::Receiver<Result<Snapshot, TransportError>>,
}

#[async_trait]
impl SnapshotStream for ChannelStream {
    async fn next_snapshot(&mut self) -> Result<Option<Snapshot>, TransportError> {
        self.rx.recv().await.transpose()
    }
}
