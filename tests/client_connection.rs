//! Integration tests driving a [`ClientConnection`] against scripted
//! world model peers.

mod common;

use std::time::Duration;

use grail_worldmodel::codec::client::{
    self,
    AliasedAttribute,
    AliasedWorldData,
};
use grail_worldmodel::codec::client_handshake;
use grail_worldmodel::{ClientConnection, Request, WorldModelError};

fn data_response(uri: &str, name_alias: u32, origin_alias: u32, ticket: u32) -> bytes::Bytes {
    client::encode_data_response(
        &AliasedWorldData {
            object_uri: uri.to_string(),
            attributes: vec![AliasedAttribute {
                name_alias,
                creation: 100,
                expiration: 0,
                origin_alias,
                data: vec![1, 2],
            }],
        },
        ticket,
    )
}

#[tokio::test]
async fn single_snapshot_resolves_aliases_and_merges_partials() {
    let (listener, addr) = common::listen().await;
    let server = tokio::spawn(async move {
        let mut frames = common::accept_with_handshake(&listener, client_handshake()).await;
        let (request, ticket) =
            client::decode_snapshot_request(common::next_payload(&mut frames).await)
                .expect("decode snapshot request");
        assert_eq!(request.object_uri, "u.*");

        common::send_payload(
            &mut frames,
            client::encode_attribute_alias(&[(1, "loc".to_string())]),
        )
        .await;
        common::send_payload(
            &mut frames,
            client::encode_origin_alias(&[(7, "tracker".to_string())]),
        )
        .await;
        common::send_payload(&mut frames, data_response("u1", 1, 7, ticket)).await;
        common::send_payload(&mut frames, data_response("u2", 1, 7, ticket)).await;
        common::send_payload(&mut frames, client::encode_request_complete(ticket)).await;
        frames
    });

    let connection = ClientConnection::connect("127.0.0.1", addr.port()).await;
    assert!(connection.connected());

    let mut response = connection
        .snapshot(&Request {
            object_uri: "u.*".to_string(),
            attributes: vec![".*".to_string()],
            start: 0,
            stop: 0,
        })
        .await;
    common::wait_for(|| response.ready(), "snapshot result").await;
    assert!(!response.is_error());
    let world = response.get().await.expect("snapshot result");

    assert_eq!(world.len(), 2);
    assert_eq!(world["u1"][0].name, "loc");
    assert_eq!(world["u1"][0].origin, "tracker");
    assert_eq!(world["u1"][0].data, vec![1, 2]);
    assert_eq!(world["u2"][0].name, "loc");

    drop(server.await.expect("join server"));
}

#[tokio::test]
async fn stream_yields_each_update_then_the_empty_end_state() {
    let (listener, addr) = common::listen().await;
    let server = tokio::spawn(async move {
        let mut frames = common::accept_with_handshake(&listener, client_handshake()).await;
        let (_, ticket) = client::decode_stream_request(common::next_payload(&mut frames).await)
            .expect("decode stream request");

        common::send_payload(
            &mut frames,
            client::encode_attribute_alias(&[(1, "loc".to_string())]),
        )
        .await;
        common::send_payload(
            &mut frames,
            client::encode_origin_alias(&[(7, "tracker".to_string())]),
        )
        .await;
        common::send_payload(&mut frames, data_response("u1", 1, 7, ticket)).await;
        common::send_payload(&mut frames, data_response("u2", 1, 7, ticket)).await;
        common::send_payload(&mut frames, client::encode_request_complete(ticket)).await;
        frames
    });

    let connection = ClientConnection::connect("127.0.0.1", addr.port()).await;
    let mut stream = connection
        .stream("u.*", vec![".*".to_string()], 100)
        .await;

    let first = stream.next().await.expect("first update");
    assert!(first.contains_key("u1"));
    assert!(!stream.is_complete());

    let second = stream.next().await.expect("second update");
    assert!(second.contains_key("u2"));

    let end = stream.next().await.expect("end of stream");
    assert!(end.is_empty());
    assert!(stream.is_complete());
    assert!(!stream.has_next());
    assert!(!stream.is_error());

    drop(server.await.expect("join server"));
}

#[tokio::test]
async fn stream_surfaces_connection_closed_after_the_peer_dies() {
    let (listener, addr) = common::listen().await;
    let server = tokio::spawn(async move {
        let mut frames = common::accept_with_handshake(&listener, client_handshake()).await;
        let (_, ticket) = client::decode_stream_request(common::next_payload(&mut frames).await)
            .expect("decode stream request");
        common::send_payload(
            &mut frames,
            client::encode_attribute_alias(&[(1, "loc".to_string())]),
        )
        .await;
        common::send_payload(
            &mut frames,
            client::encode_origin_alias(&[(7, "tracker".to_string())]),
        )
        .await;
        common::send_payload(&mut frames, data_response("u1", 1, 7, ticket)).await;
        // Drop the socket mid-stream.
    });

    let connection = ClientConnection::connect("127.0.0.1", addr.port()).await;
    let mut stream = connection
        .stream("u.*", vec![".*".to_string()], 100)
        .await;

    let first = stream.next().await.expect("first update");
    assert!(first.contains_key("u1"));

    let error = stream.next().await.expect_err("stream after disconnect");
    assert!(matches!(error, WorldModelError::ConnectionClosed(_)));
    assert!(stream.is_error());
    assert!(matches!(
        stream.get_error(),
        Some(WorldModelError::ConnectionClosed(_))
    ));

    server.await.expect("join server");
}

#[tokio::test]
async fn keep_alive_is_answered_within_one_message_cycle() {
    let (listener, addr) = common::listen().await;
    let server = tokio::spawn(async move {
        let mut frames = common::accept_with_handshake(&listener, client_handshake()).await;
        common::send_payload(&mut frames, client::encode_keep_alive()).await;
        let reply = tokio::time::timeout(Duration::from_secs(5), common::next_payload(&mut frames))
            .await
            .expect("keep-alive reply arrives");
        assert_eq!(reply, client::encode_keep_alive());
    });

    let connection = ClientConnection::connect("127.0.0.1", addr.port()).await;
    assert!(connection.connected());
    server.await.expect("join server");
}

#[tokio::test]
async fn tickets_are_strictly_monotonic_across_request_kinds() {
    let (listener, addr) = common::listen().await;
    let server = tokio::spawn(async move {
        let mut frames = common::accept_with_handshake(&listener, client_handshake()).await;
        let (_, first) = client::decode_snapshot_request(common::next_payload(&mut frames).await)
            .expect("decode snapshot request");
        let (_, second) = client::decode_range_request(common::next_payload(&mut frames).await)
            .expect("decode range request");
        let (_, third) = client::decode_stream_request(common::next_payload(&mut frames).await)
            .expect("decode stream request");
        assert_eq!((first, second, third), (0, 1, 2));
        frames
    });

    let connection = ClientConnection::connect("127.0.0.1", addr.port()).await;
    let request = Request {
        object_uri: "u.*".to_string(),
        attributes: vec![".*".to_string()],
        start: 0,
        stop: 1_000,
    };
    let _snapshot = connection.snapshot(&request).await;
    let _range = connection.range(&request).await;
    let _stream = connection.stream("u.*", vec![".*".to_string()], 50).await;

    drop(server.await.expect("join server"));
}

#[tokio::test]
async fn handshake_mismatch_leaves_the_connection_down() {
    let (listener, addr) = common::listen().await;
    let server = tokio::spawn(async move {
        common::accept_with_bad_handshake(&listener, client_handshake()).await;
        // Dropping the listener refuses later dials quickly.
    });

    let connection = ClientConnection::connect("127.0.0.1", addr.port()).await;
    assert!(!connection.connected());
    server.await.expect("join server");

    let response = connection
        .snapshot(&Request {
            object_uri: "u.*".to_string(),
            attributes: Vec::new(),
            start: 0,
            stop: 0,
        })
        .await;
    assert!(response.is_error());
    assert_eq!(
        response.get().await.expect_err("request while disconnected"),
        WorldModelError::NotConnected
    );
}
