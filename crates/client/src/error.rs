/// Failures of a single streaming connection.
///
/// Every variant is treated the same way by the reconnection controller:
/// the connection is dropped and a retry is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established or was refused.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Reading the open stream failed.
    #[error("stream read failed: {0}")]
    Io(String),

    /// A frame arrived that is not a valid snapshot.
    #[error("malformed snapshot: {0}")]
    Decode(String),

    /// The server ended the stream.
    #[error("stream closed by server")]
    Closed,
}
