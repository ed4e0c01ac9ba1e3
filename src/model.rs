//! Data types of the world model protocol.
//!
//! These are the values that cross the public API: world state returned
//! to clients, attribute updates pushed by solvers, and the subscription
//! and sample records of the aggregator protocol.

use std::collections::HashMap;

/// World model timestamps, in milliseconds since the Unix epoch.
pub type GrailTime = i64;

/// String identifier naming an entity in the world model.
pub type Uri = String;

/// A typed, time-stamped, origin-tagged value attached to a URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute type name, resolved from the server's alias table.
    pub name: String,
    /// Time the value was created.
    pub creation: GrailTime,
    /// Time the value expires, or zero if unexpired.
    pub expiration: GrailTime,
    /// Origin string of the solver that produced the value.
    pub origin: String,
    /// Opaque attribute payload.
    pub data: Vec<u8>,
}

/// Snapshot of world entities and their attributes, keyed by URI.
pub type WorldState = HashMap<Uri, Vec<Attribute>>;

/// Parameters of a client query.
///
/// `start` and `stop` bound snapshot and range queries; for a stream
/// request `stop` carries the update interval in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Regular expression selecting the URIs of interest.
    pub object_uri: Uri,
    /// Regular expressions selecting attribute names of interest.
    pub attributes: Vec<String>,
    /// Start of the queried interval.
    pub start: GrailTime,
    /// End of the queried interval, or the streaming update interval.
    pub stop: GrailTime,
}

/// A solver-produced attribute type declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec {
    /// Attribute type name.
    pub name: String,
    /// True if the type is only produced while some client requests it.
    pub on_demand: bool,
}

impl TypeSpec {
    /// Declare an always-on attribute type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_demand: false,
        }
    }

    /// Declare an on-demand attribute type.
    #[must_use]
    pub fn on_demand(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_demand: true,
        }
    }
}

/// A single attribute update pushed by a solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeUpdate {
    /// Attribute type name; must match a declared [`TypeSpec`].
    pub type_name: String,
    /// Time the value was computed.
    pub time: GrailTime,
    /// URI the value attaches to.
    pub target: Uri,
    /// Opaque attribute payload.
    pub data: Vec<u8>,
}

/// Address of an aggregator server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetTarget {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl NetTarget {
    /// Create a new aggregator address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Selects transmitters by identifier under a bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmitter {
    /// Base identifier the masked sample id must equal.
    pub base_id: u64,
    /// Bits of the sample id that participate in the comparison.
    pub mask: u64,
}

/// A subscription request sent to an aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Physical layer the rules apply to; zero matches all layers.
    pub physical_layer: u8,
    /// Transmitters of interest; empty subscribes to all of them.
    pub transmitters: Vec<Transmitter>,
    /// Minimum interval between updates for a transmitter, in
    /// milliseconds; zero requests every sample.
    pub update_interval: GrailTime,
}

/// A raw sensor sample streamed by an aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleData {
    /// Physical layer the sample was received on.
    pub physical_layer: u8,
    /// Transmitter identifier.
    pub tx_id: u64,
    /// Receiver identifier.
    pub rx_id: u64,
    /// Receiver timestamp.
    pub rx_timestamp: GrailTime,
    /// Received signal strength.
    pub rss: f32,
    /// Opaque sensed payload.
    pub sense_data: Vec<u8>,
    /// False if the aggregator flagged the sample as unusable.
    pub valid: bool,
}
