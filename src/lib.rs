//! Connection managers for the GRAIL World Model.
//!
//! The world model is a pub/sub spatial-data service that tracks named
//! entities (URIs) and their typed, time-stamped attributes. This crate
//! provides the three peer roles a program can take towards it:
//!
//! - [`ClientConnection`] queries the model for snapshots, historical
//!   ranges, or live streams of attribute data.
//! - [`SolverConnection`] pushes computed attributes into the model and
//!   answers on-demand activation requests.
//! - [`AggregatorConnection`] holds persistent subscriptions to one or
//!   more aggregator servers streaming raw sensor samples.
//!
//! Each connection owns a background receive task over a length-prefixed
//! TCP transport; public methods are safe to call from any task.

pub mod aggregator;
pub mod client;
pub mod codec;
pub mod error;
mod framing;
pub mod model;
pub mod solver;

pub use aggregator::AggregatorConnection;
pub use client::{ClientConnection, Response, StepResponse};
pub use error::WorldModelError;
pub use model::{
    Attribute,
    AttributeUpdate,
    GrailTime,
    NetTarget,
    Request,
    SampleData,
    Subscription,
    Transmitter,
    TypeSpec,
    Uri,
    WorldState,
};
pub use solver::SolverConnection;
