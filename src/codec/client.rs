//! Messages exchanged between a client and the world model.

use bytes::{BufMut, Bytes};

use super::primitives::{
    expect_message,
    get_blob,
    get_i64,
    get_string,
    get_u32,
    message,
    put_blob,
    put_string,
};
use super::DecodeError;
use crate::model::{GrailTime, Request, Uri};

/// Message ids of the client protocol, found at byte 0 of each payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    /// Liveness probe; each side echoes the other's.
    KeepAlive = 0,
    /// Point-in-time query.
    SnapshotRequest = 1,
    /// Historical interval query.
    RangeRequest = 2,
    /// Live subscription query.
    StreamRequest = 3,
    /// Declares integer aliases for attribute names.
    AttributeAlias = 4,
    /// Declares integer aliases for origin strings.
    OriginAlias = 5,
    /// Marks a ticket's response as finished.
    RequestComplete = 6,
    /// A partial or streamed result for a ticket.
    DataResponse = 7,
}

impl MessageId {
    /// Map a payload's leading byte onto a message id.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::KeepAlive),
            1 => Some(Self::SnapshotRequest),
            2 => Some(Self::RangeRequest),
            3 => Some(Self::StreamRequest),
            4 => Some(Self::AttributeAlias),
            5 => Some(Self::OriginAlias),
            6 => Some(Self::RequestComplete),
            7 => Some(Self::DataResponse),
            _ => None,
        }
    }
}

/// An attribute whose name and origin are still alias-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasedAttribute {
    /// Alias of the attribute name, per the `attribute_alias` table.
    pub name_alias: u32,
    /// Time the value was created.
    pub creation: GrailTime,
    /// Time the value expires, or zero.
    pub expiration: GrailTime,
    /// Alias of the origin string, per the `origin_alias` table.
    pub origin_alias: u32,
    /// Opaque attribute payload.
    pub data: Vec<u8>,
}

/// One URI's worth of alias-encoded attribute data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasedWorldData {
    /// The entity the attributes belong to.
    pub object_uri: Uri,
    /// The attributes carried by this response.
    pub attributes: Vec<AliasedAttribute>,
}

/// Encode a keep-alive probe or reply.
#[must_use]
pub fn encode_keep_alive() -> Bytes { message(MessageId::KeepAlive as u8).freeze() }

fn encode_request(id: MessageId, request: &Request, ticket: u32, times: &[GrailTime]) -> Bytes {
    let mut buf = message(id as u8);
    buf.put_u32(ticket);
    put_string(&mut buf, &request.object_uri);
    buf.put_u32(u32::try_from(request.attributes.len()).expect("attribute list fits a frame"));
    for attribute in &request.attributes {
        put_string(&mut buf, attribute);
    }
    for time in times {
        buf.put_i64(*time);
    }
    buf.freeze()
}

fn decode_request(
    payload: Bytes,
    id: MessageId,
    time_fields: usize,
) -> Result<(Request, u32), DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, id as u8)?;
    let ticket = get_u32(&mut buf)?;
    let object_uri = get_string(&mut buf)?;
    let count = get_u32(&mut buf)? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        attributes.push(get_string(&mut buf)?);
    }
    let mut times = [0_i64; 2];
    for slot in times.iter_mut().take(time_fields) {
        *slot = get_i64(&mut buf)?;
    }
    let (start, stop) = if time_fields == 1 {
        (0, times[0])
    } else {
        (times[0], times[1])
    };
    Ok((
        Request {
            object_uri,
            attributes,
            start,
            stop,
        },
        ticket,
    ))
}

/// Encode a snapshot query for the state at `request.stop`, built from
/// data no older than `request.start`.
#[must_use]
pub fn encode_snapshot_request(request: &Request, ticket: u32) -> Bytes {
    encode_request(
        MessageId::SnapshotRequest,
        request,
        ticket,
        &[request.start, request.stop],
    )
}

/// Encode a query for all changes between `request.start` and
/// `request.stop`.
#[must_use]
pub fn encode_range_request(request: &Request, ticket: u32) -> Bytes {
    encode_request(
        MessageId::RangeRequest,
        request,
        ticket,
        &[request.start, request.stop],
    )
}

/// Encode a live subscription updating every `request.stop` milliseconds.
#[must_use]
pub fn encode_stream_request(request: &Request, ticket: u32) -> Bytes {
    encode_request(MessageId::StreamRequest, request, ticket, &[request.stop])
}

/// Decode a snapshot query.
pub fn decode_snapshot_request(payload: Bytes) -> Result<(Request, u32), DecodeError> {
    decode_request(payload, MessageId::SnapshotRequest, 2)
}

/// Decode a range query.
pub fn decode_range_request(payload: Bytes) -> Result<(Request, u32), DecodeError> {
    decode_request(payload, MessageId::RangeRequest, 2)
}

/// Decode a stream query; the interval lands in `Request::stop`.
pub fn decode_stream_request(payload: Bytes) -> Result<(Request, u32), DecodeError> {
    decode_request(payload, MessageId::StreamRequest, 1)
}

fn encode_alias_list(id: MessageId, aliases: &[(u32, String)]) -> Bytes {
    let mut buf = message(id as u8);
    buf.put_u32(u32::try_from(aliases.len()).expect("alias list fits a frame"));
    for (alias, name) in aliases {
        buf.put_u32(*alias);
        put_string(&mut buf, name);
    }
    buf.freeze()
}

fn decode_alias_list(payload: Bytes, id: MessageId) -> Result<Vec<(u32, String)>, DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, id as u8)?;
    let count = get_u32(&mut buf)? as usize;
    let mut aliases = Vec::with_capacity(count);
    for _ in 0..count {
        let alias = get_u32(&mut buf)?;
        aliases.push((alias, get_string(&mut buf)?));
    }
    Ok(aliases)
}

/// Encode an attribute-name alias declaration.
#[must_use]
pub fn encode_attribute_alias(aliases: &[(u32, String)]) -> Bytes {
    encode_alias_list(MessageId::AttributeAlias, aliases)
}

/// Decode an attribute-name alias declaration.
pub fn decode_attribute_alias(payload: Bytes) -> Result<Vec<(u32, String)>, DecodeError> {
    decode_alias_list(payload, MessageId::AttributeAlias)
}

/// Encode an origin alias declaration.
#[must_use]
pub fn encode_origin_alias(aliases: &[(u32, String)]) -> Bytes {
    encode_alias_list(MessageId::OriginAlias, aliases)
}

/// Decode an origin alias declaration.
pub fn decode_origin_alias(payload: Bytes) -> Result<Vec<(u32, String)>, DecodeError> {
    decode_alias_list(payload, MessageId::OriginAlias)
}

/// Encode the completion marker for a ticket.
#[must_use]
pub fn encode_request_complete(ticket: u32) -> Bytes {
    let mut buf = message(MessageId::RequestComplete as u8);
    buf.put_u32(ticket);
    buf.freeze()
}

/// Decode the completion marker, yielding the finished ticket.
pub fn decode_request_complete(payload: Bytes) -> Result<u32, DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, MessageId::RequestComplete as u8)?;
    get_u32(&mut buf)
}

/// Encode a data response for a ticket.
#[must_use]
pub fn encode_data_response(data: &AliasedWorldData, ticket: u32) -> Bytes {
    let mut buf = message(MessageId::DataResponse as u8);
    buf.put_u32(ticket);
    put_string(&mut buf, &data.object_uri);
    buf.put_u32(u32::try_from(data.attributes.len()).expect("attribute list fits a frame"));
    for attribute in &data.attributes {
        buf.put_u32(attribute.name_alias);
        buf.put_i64(attribute.creation);
        buf.put_i64(attribute.expiration);
        buf.put_u32(attribute.origin_alias);
        put_blob(&mut buf, &attribute.data);
    }
    buf.freeze()
}

/// Decode a data response into alias-encoded world data and its ticket.
pub fn decode_data_response(payload: Bytes) -> Result<(AliasedWorldData, u32), DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, MessageId::DataResponse as u8)?;
    let ticket = get_u32(&mut buf)?;
    let object_uri = get_string(&mut buf)?;
    let count = get_u32(&mut buf)? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        attributes.push(AliasedAttribute {
            name_alias: get_u32(&mut buf)?,
            creation: get_i64(&mut buf)?,
            expiration: get_i64(&mut buf)?,
            origin_alias: get_u32(&mut buf)?,
            data: get_blob(&mut buf)?,
        });
    }
    Ok((
        AliasedWorldData {
            object_uri,
            attributes,
        },
        ticket,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_request_round_trips_interval() {
        let request = Request {
            object_uri: "region\\..*".to_string(),
            attributes: vec!["location".to_string(), "speed".to_string()],
            start: 0,
            stop: 250,
        };
        let payload = encode_stream_request(&request, 9);
        let (decoded, ticket) = decode_stream_request(payload).expect("decode stream request");
        assert_eq!(ticket, 9);
        assert_eq!(decoded, request);
    }

    #[test]
    fn data_response_round_trips_attributes_and_ticket() {
        let data = AliasedWorldData {
            object_uri: "u1".to_string(),
            attributes: vec![AliasedAttribute {
                name_alias: 1,
                creation: 100,
                expiration: 0,
                origin_alias: 2,
                data: vec![0xde, 0xad],
            }],
        };
        let (decoded, ticket) =
            decode_data_response(encode_data_response(&data, 3)).expect("decode data response");
        assert_eq!(ticket, 3);
        assert_eq!(decoded, data);
    }

    #[test]
    fn wrong_message_id_is_rejected() {
        let payload = encode_request_complete(4);
        assert!(matches!(
            decode_data_response(payload),
            Err(DecodeError::UnexpectedMessage { .. })
        ));
    }
}
