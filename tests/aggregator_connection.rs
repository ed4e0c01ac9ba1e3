//! Integration tests driving an [`AggregatorConnection`] against
//! scripted aggregator peers.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use grail_worldmodel::codec::aggregator;
use grail_worldmodel::codec::aggregator_handshake;
use grail_worldmodel::{AggregatorConnection, NetTarget, SampleData, Subscription, Transmitter};

fn subscription(update_interval: i64) -> Subscription {
    Subscription {
        physical_layer: 1,
        transmitters: vec![Transmitter {
            base_id: 0x42,
            mask: 0xffff,
        }],
        update_interval,
    }
}

fn sample(tx_id: u64, valid: bool) -> SampleData {
    SampleData {
        physical_layer: 1,
        tx_id,
        rx_id: 9,
        rx_timestamp: 1_000,
        rss: -70.25,
        sense_data: vec![1, 2, 3],
        valid,
    }
}

#[tokio::test]
async fn add_rules_fans_new_subscriptions_out_to_every_target() {
    let (listener_a, addr_a) = common::listen().await;
    let (listener_b, addr_b) = common::listen().await;

    let connection = AggregatorConnection::new(
        vec![
            NetTarget::new("127.0.0.1", addr_a.port()),
            NetTarget::new("127.0.0.1", addr_b.port()),
        ],
        |_sample| {},
    );

    // No connections are opened before the first rule arrives.
    connection.add_rules(subscription(100)).await;

    let mut peers = Vec::new();
    for listener in [&listener_a, &listener_b] {
        let mut frames = common::accept_with_handshake(listener, aggregator_handshake()).await;
        let first = aggregator::decode_subscribe_request(common::next_payload(&mut frames).await)
            .expect("decode first subscription");
        assert_eq!(first, subscription(100));
        peers.push(frames);
    }

    connection.add_rules(subscription(200)).await;
    for frames in &mut peers {
        let second = aggregator::decode_subscribe_request(common::next_payload(frames).await)
            .expect("decode second subscription");
        assert_eq!(second, subscription(200));

        // Exactly once per worker: nothing further arrives.
        let extra =
            tokio::time::timeout(Duration::from_millis(200), common::next_payload(frames)).await;
        assert!(extra.is_err(), "unexpected extra subscribe request");
    }

    connection.disconnect().await;
}

#[tokio::test]
async fn valid_samples_reach_the_callback_and_invalid_ones_do_not() {
    let (listener, addr) = common::listen().await;
    let received: Arc<Mutex<Vec<SampleData>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    let connection = AggregatorConnection::new(
        vec![NetTarget::new("127.0.0.1", addr.port())],
        move |sample| sink.lock().expect("callback mutex").push(sample),
    );
    connection.add_rules(subscription(0)).await;

    let mut frames = common::accept_with_handshake(&listener, aggregator_handshake()).await;
    let _ = aggregator::decode_subscribe_request(common::next_payload(&mut frames).await)
        .expect("decode subscription");

    common::send_payload(&mut frames, aggregator::encode_server_sample(&sample(7, false))).await;
    common::send_payload(&mut frames, aggregator::encode_server_sample(&sample(8, true))).await;
    common::send_payload(
        &mut frames,
        aggregator::encode_subscription_response(&subscription(0)),
    )
    .await;
    common::send_payload(&mut frames, aggregator::encode_server_sample(&sample(9, true))).await;

    common::wait_for(
        || received.lock().expect("callback mutex").len() == 2,
        "samples to reach the callback",
    )
    .await;
    let samples = received.lock().expect("callback mutex");
    assert_eq!(samples[0].tx_id, 8);
    assert_eq!(samples[1].tx_id, 9);
    drop(samples);

    connection.disconnect().await;
}

#[tokio::test]
async fn update_rules_reconnects_with_only_the_replacement_subscription() {
    let (listener, addr) = common::listen().await;

    let connection = AggregatorConnection::new(
        vec![NetTarget::new("127.0.0.1", addr.port())],
        |_sample| {},
    );
    connection.add_rules(subscription(100)).await;

    let mut frames = common::accept_with_handshake(&listener, aggregator_handshake()).await;
    let first = aggregator::decode_subscribe_request(common::next_payload(&mut frames).await)
        .expect("decode original subscription");
    assert_eq!(first, subscription(100));

    // The protocol has no unsubscribe, so replacing the rules severs the
    // session and re-handshakes with the new list only.
    let update = connection.update_rules(subscription(200));
    let reaccept = async {
        let mut frames = common::accept_with_handshake(&listener, aggregator_handshake()).await;
        let replacement =
            aggregator::decode_subscribe_request(common::next_payload(&mut frames).await)
                .expect("decode replacement subscription");
        assert_eq!(replacement, subscription(200));
        frames
    };
    let ((), mut frames) = tokio::join!(update, reaccept);

    let extra =
        tokio::time::timeout(Duration::from_millis(200), common::next_payload(&mut frames)).await;
    assert!(extra.is_err(), "old subscription resent after reconnect");

    connection.disconnect().await;
}

#[tokio::test]
async fn disconnect_is_idempotent_and_workers_exit() {
    let (listener, addr) = common::listen().await;
    let connection = AggregatorConnection::new(
        vec![NetTarget::new("127.0.0.1", addr.port())],
        |_sample| {},
    );
    connection.add_rules(subscription(100)).await;

    let mut frames = common::accept_with_handshake(&listener, aggregator_handshake()).await;
    let _ = aggregator::decode_subscribe_request(common::next_payload(&mut frames).await)
        .expect("decode subscription");

    connection.disconnect().await;
    connection.disconnect().await;

    // The worker closed its end of the socket.
    let eof = tokio::time::timeout(Duration::from_secs(5), async {
        use futures::StreamExt;
        frames.next().await
    })
    .await
    .expect("worker closes its socket");
    assert!(eof.is_none());
}
