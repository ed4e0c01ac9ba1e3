//! Length-prefixed TCP framing shared by the three connection roles.
//!
//! The handshake is exchanged raw, before framing starts; afterwards the
//! stream is wrapped in a [`Framed`] transport whose 4-byte big-endian
//! length prefix delimits message payloads. Connections split the
//! transport so the receive task can own the read half while writers
//! share the sink behind the connection's send mutex. Reconnecting
//! builds a fresh transport, which also discards any unfinished bytes
//! buffered by the previous one.

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::WorldModelError;

/// Largest payload accepted from a peer.
const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

pub(crate) type FrameSink = SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>;
pub(crate) type FrameSource = SplitStream<Framed<TcpStream, LengthDelimitedCodec>>;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Wrap a handshaken stream in the framed transport and split it.
pub(crate) fn split_frames(stream: TcpStream) -> (FrameSink, FrameSource) {
    Framed::new(stream, codec()).split()
}

/// Open a TCP connection to `(host, port)`.
pub(crate) async fn connect(host: &str, port: u16) -> Result<TcpStream, WorldModelError> {
    TcpStream::connect((host, port))
        .await
        .map_err(|e| WorldModelError::ConnectionClosed(format!("connect to {host}:{port}: {e}")))
}

/// Send `handshake` and require the peer to echo it byte for byte.
///
/// A short read or any byte mismatch fails the exchange; the caller
/// drops the stream.
pub(crate) async fn exchange_handshake(
    stream: &mut TcpStream,
    handshake: &Bytes,
) -> Result<(), WorldModelError> {
    stream
        .write_all(handshake)
        .await
        .map_err(|e| WorldModelError::HandshakeFailed(format!("send: {e}")))?;
    let mut echo = vec![0_u8; handshake.len()];
    stream
        .read_exact(&mut echo)
        .await
        .map_err(|e| WorldModelError::HandshakeFailed(format!("receive: {e}")))?;
    if echo != *handshake {
        return Err(WorldModelError::HandshakeFailed(
            "peer sent a different protocol string".to_string(),
        ));
    }
    Ok(())
}
