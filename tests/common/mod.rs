//! Helpers for scripting world model and aggregator peers in tests.
#![allow(dead_code)]

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

pub type ServerFrames = Framed<TcpStream, LengthDelimitedCodec>;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(4)
        .new_codec()
}

/// Bind a scripted peer on an ephemeral port.
pub async fn listen() -> (TcpListener, std::net::SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("test listener address");
    (listener, addr)
}

/// Accept one connection, verify the handshake, and echo it back.
pub async fn accept_with_handshake(listener: &TcpListener, handshake: Bytes) -> ServerFrames {
    let (mut stream, _) = listener.accept().await.expect("accept connection");
    let mut received = vec![0_u8; handshake.len()];
    stream
        .read_exact(&mut received)
        .await
        .expect("read peer handshake");
    assert_eq!(received, handshake, "peer sent the wrong handshake");
    stream.write_all(&handshake).await.expect("echo handshake");
    Framed::new(stream, codec())
}

/// Accept one connection and answer its handshake with garbage of the
/// same length.
pub async fn accept_with_bad_handshake(listener: &TcpListener, handshake: Bytes) {
    let (mut stream, _) = listener.accept().await.expect("accept connection");
    let mut received = vec![0_u8; handshake.len()];
    stream
        .read_exact(&mut received)
        .await
        .expect("read peer handshake");
    let garbage = vec![0xa5_u8; handshake.len()];
    stream.write_all(&garbage).await.expect("send bad handshake");
}

/// Read the next frame payload from the peer.
pub async fn next_payload(frames: &mut ServerFrames) -> Bytes {
    frames
        .next()
        .await
        .expect("peer closed the connection")
        .expect("frame transport")
        .freeze()
}

/// Send a frame payload to the peer.
pub async fn send_payload(frames: &mut ServerFrames, payload: Bytes) {
    frames.send(payload).await.expect("send frame");
}

/// Wait until `condition` holds, panicking after five seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Duration::from_secs(5);
    let poll = tokio::time::Duration::from_millis(10);
    let result = tokio::time::timeout(deadline, async {
        while !condition() {
            tokio::time::sleep(poll).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}
