//! Error types shared by the three connection roles.

use crate::codec::DecodeError;

/// Failures surfaced by world model connections.
///
/// Client-side request failures travel through the per-ticket result
/// channel *and* are recorded for the handle accessors
/// ([`Response::is_error`](crate::client::Response::is_error) /
/// [`Response::get_error`](crate::client::Response::get_error)), so the
/// type is `Clone` and carries rendered detail strings rather than live
/// I/O sources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldModelError {
    /// The socket was closed and a reconnect attempt could not open one.
    #[error("not connected to the world model")]
    NotConnected,
    /// The peer answered the handshake with different bytes, or closed
    /// the socket before echoing it in full.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    /// The transport failed mid-stream; every live ticket of a client
    /// connection observes this error.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    /// The connection object was torn down while the request was live.
    #[error("world model connection destroyed with the request pending")]
    RequestDestroyed,
    /// A frame could not be decoded, or referenced an alias that was
    /// never declared.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// An on-demand URI pattern failed to compile. Recorded on the
    /// individual pattern entry; never tears down the connection.
    #[error("invalid on-demand pattern {pattern:?}: {detail}")]
    RegexCompile {
        /// The pattern source as received from the world model.
        pattern: String,
        /// The compiler's diagnostic.
        detail: String,
    },
}

impl From<DecodeError> for WorldModelError {
    fn from(value: DecodeError) -> Self { Self::Protocol(value.to_string()) }
}

impl WorldModelError {
    pub(crate) fn closed(detail: impl std::fmt::Display) -> Self {
        Self::ConnectionClosed(detail.to_string())
    }
}
