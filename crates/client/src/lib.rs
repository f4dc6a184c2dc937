//! fleetline-client: viewer-side streaming for the fleet position engine.
//!
//! - [`sse`] -- incremental Server-Sent Events frame decoder
//! - [`transport`] -- the [`Transport`] seam and its HTTP implementation
//! - [`reconnect`] -- backoff policy and the [`ReconnectController`]

pub mod error;
pub mod reconnect;
pub mod sse;
pub mod transport;

pub use error::TransportError;
pub use reconnect::{Backoff, ConnectionState, ReconnectConfig, ReconnectController};
pub use sse::{SseDecoder, SseEvent};
pub use transport::{HttpTransport, Snapshot, SnapshotStream, StreamQuery, Transport};
