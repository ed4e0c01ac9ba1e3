//! Stateless encoders and decoders for the world model wire protocol.
//!
//! Frames on the wire carry a 4-byte big-endian length prefix owned by
//! the transport layer; the buffers handled here are frame payloads with
//! the message id at byte 0. Strings travel as UTF-16BE code units behind
//! a u32 byte length. All integers are big-endian.
//!
//! Handshakes are fixed byte strings exchanged raw, before framing
//! starts; the receipt contract is strict byte equality.

use bytes::{BufMut, Bytes, BytesMut};

pub mod aggregator;
pub mod client;
pub mod solver;

mod primitives;

/// Failures while decoding a frame payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload ended before the announced content.
    #[error("message truncated: {needed} more bytes required")]
    Truncated {
        /// Bytes missing from the payload.
        needed: usize,
    },
    /// A string field did not hold valid UTF-16BE code units.
    #[error("string payload is not valid UTF-16")]
    InvalidString,
    /// The payload was empty; every message carries at least its id.
    #[error("empty frame payload")]
    EmptyFrame,
    /// The payload's message id did not match the decoder invoked on it.
    #[error("unexpected message id {actual:#04x}, expected {expected:#04x}")]
    UnexpectedMessage {
        /// Id the decoder expected.
        expected: u8,
        /// Id found at byte 0 of the payload.
        actual: u8,
    },
}

const VERSION: [u8; 2] = [1, 0];

fn handshake(protocol: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + protocol.len() + VERSION.len());
    buf.put_u32(u32::try_from(protocol.len()).expect("protocol string fits a frame"));
    buf.put_slice(protocol.as_bytes());
    buf.put_slice(&VERSION);
    buf.freeze()
}

/// Handshake bytes for the client role.
#[must_use]
pub fn client_handshake() -> Bytes { handshake("GRAIL client protocol") }

/// Handshake bytes for the solver role.
#[must_use]
pub fn solver_handshake() -> Bytes { handshake("GRAIL solver protocol") }

/// Handshake bytes for the solver-to-aggregator role.
#[must_use]
pub fn aggregator_handshake() -> Bytes { handshake("GRAIL aggregator protocol") }
