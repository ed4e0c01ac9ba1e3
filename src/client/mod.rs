//! Client connection to the world model.
//!
//! A [`ClientConnection`] multiplexes snapshot, range, and stream queries
//! over one framed TCP socket. Every request is assigned a monotonically
//! increasing ticket; a background receive task dispatches inbound frames
//! by message id and routes results to the per-ticket handles
//! ([`Response`] for single-result queries, [`StepResponse`] for
//! streams). The server pushes alias tables proactively; attribute and
//! origin aliases in data responses are resolved against the latest
//! tables before results reach the caller.

mod connection;
mod pending;
mod response;

pub use connection::ClientConnection;
pub use response::{Response, StepResponse};
