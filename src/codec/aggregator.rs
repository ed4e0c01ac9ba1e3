//! Messages exchanged between a solver and an aggregator.

use bytes::{BufMut, Bytes};

use super::primitives::{
    expect_message,
    get_blob,
    get_f32,
    get_i64,
    get_u32,
    get_u64,
    get_u8,
    message,
    put_blob,
};
use super::DecodeError;
use crate::model::{SampleData, Subscription, Transmitter};

/// Message ids of the aggregator protocol, found at byte 0 of each
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    /// A subscription request from the solver.
    SubscribeRequest = 1,
    /// The server's (possibly adjusted) echo of an accepted subscription.
    SubscriptionResponse = 2,
    /// A raw sensor sample.
    ServerSample = 3,
}

impl MessageId {
    /// Map a payload's leading byte onto a message id.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::SubscribeRequest),
            2 => Some(Self::SubscriptionResponse),
            3 => Some(Self::ServerSample),
            _ => None,
        }
    }
}

fn encode_subscription(id: MessageId, subscription: &Subscription) -> Bytes {
    let mut buf = message(id as u8);
    buf.put_u8(subscription.physical_layer);
    buf.put_u32(
        u32::try_from(subscription.transmitters.len()).expect("transmitter list fits a frame"),
    );
    for transmitter in &subscription.transmitters {
        buf.put_u64(transmitter.base_id);
        buf.put_u64(transmitter.mask);
    }
    buf.put_i64(subscription.update_interval);
    buf.freeze()
}

fn decode_subscription(payload: Bytes, id: MessageId) -> Result<Subscription, DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, id as u8)?;
    let physical_layer = get_u8(&mut buf)?;
    let count = get_u32(&mut buf)? as usize;
    let mut transmitters = Vec::with_capacity(count);
    for _ in 0..count {
        transmitters.push(Transmitter {
            base_id: get_u64(&mut buf)?,
            mask: get_u64(&mut buf)?,
        });
    }
    Ok(Subscription {
        physical_layer,
        transmitters,
        update_interval: get_i64(&mut buf)?,
    })
}

/// Encode a subscription request.
#[must_use]
pub fn encode_subscribe_request(subscription: &Subscription) -> Bytes {
    encode_subscription(MessageId::SubscribeRequest, subscription)
}

/// Decode a subscription request.
pub fn decode_subscribe_request(payload: Bytes) -> Result<Subscription, DecodeError> {
    decode_subscription(payload, MessageId::SubscribeRequest)
}

/// Encode the server's acceptance of a subscription.
#[must_use]
pub fn encode_subscription_response(subscription: &Subscription) -> Bytes {
    encode_subscription(MessageId::SubscriptionResponse, subscription)
}

/// Decode the server's acceptance of a subscription.
pub fn decode_subscription_response(payload: Bytes) -> Result<Subscription, DecodeError> {
    decode_subscription(payload, MessageId::SubscriptionResponse)
}

/// Encode a sensor sample.
#[must_use]
pub fn encode_server_sample(sample: &SampleData) -> Bytes {
    let mut buf = message(MessageId::ServerSample as u8);
    buf.put_u8(sample.physical_layer);
    buf.put_u64(sample.tx_id);
    buf.put_u64(sample.rx_id);
    buf.put_i64(sample.rx_timestamp);
    buf.put_f32(sample.rss);
    buf.put_u8(u8::from(sample.valid));
    put_blob(&mut buf, &sample.sense_data);
    buf.freeze()
}

/// Decode a sensor sample.
pub fn decode_server_sample(payload: Bytes) -> Result<SampleData, DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, MessageId::ServerSample as u8)?;
    Ok(SampleData {
        physical_layer: get_u8(&mut buf)?,
        tx_id: get_u64(&mut buf)?,
        rx_id: get_u64(&mut buf)?,
        rx_timestamp: get_i64(&mut buf)?,
        rss: get_f32(&mut buf)?,
        valid: get_u8(&mut buf)? != 0,
        sense_data: get_blob(&mut buf)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_round_trips_transmitter_rules() {
        let subscription = Subscription {
            physical_layer: 1,
            transmitters: vec![Transmitter {
                base_id: 0x0100,
                mask: 0xffff,
            }],
            update_interval: 500,
        };
        let decoded = decode_subscribe_request(encode_subscribe_request(&subscription))
            .expect("decode subscription");
        assert_eq!(decoded, subscription);
    }

    #[test]
    fn sample_keeps_validity_flag() {
        let sample = SampleData {
            physical_layer: 1,
            tx_id: 77,
            rx_id: 3,
            rx_timestamp: 1_000,
            rss: -61.5,
            sense_data: vec![9, 8, 7],
            valid: false,
        };
        let decoded =
            decode_server_sample(encode_server_sample(&sample)).expect("decode sample");
        assert_eq!(decoded, sample);
    }
}
