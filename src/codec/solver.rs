//! Messages exchanged between a solver and the world model.

use bytes::{BufMut, Bytes};

use super::primitives::{
    expect_message,
    get_blob,
    get_i64,
    get_string,
    get_u32,
    get_u8,
    message,
    put_blob,
    put_string,
};
use super::DecodeError;
use crate::model::{GrailTime, Uri};

/// Message ids of the solver protocol, found at byte 0 of each payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    /// Liveness probe; each side echoes the other's.
    KeepAlive = 0,
    /// Declares the attribute types a solver produces.
    TypeAnnounce = 1,
    /// Requests production of on-demand attributes for URI patterns.
    StartOnDemand = 2,
    /// Withdraws one on-demand request per listed pattern.
    StopOnDemand = 3,
    /// A batch of attribute updates.
    SolverData = 4,
    /// Creates a URI in the world model.
    CreateUri = 5,
    /// Expires a URI at a given time.
    ExpireUri = 6,
    /// Deletes a URI outright.
    DeleteUri = 7,
    /// Expires one attribute of a URI at a given time.
    ExpireAttribute = 8,
    /// Deletes one attribute of a URI.
    DeleteAttribute = 9,
}

impl MessageId {
    /// Map a payload's leading byte onto a message id.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::KeepAlive),
            1 => Some(Self::TypeAnnounce),
            2 => Some(Self::StartOnDemand),
            3 => Some(Self::StopOnDemand),
            4 => Some(Self::SolverData),
            5 => Some(Self::CreateUri),
            6 => Some(Self::ExpireUri),
            7 => Some(Self::DeleteUri),
            8 => Some(Self::ExpireAttribute),
            9 => Some(Self::DeleteAttribute),
            _ => None,
        }
    }
}

/// A type registry entry as announced on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasType {
    /// Integer alias standing in for the type name in data messages.
    pub alias: u32,
    /// Attribute type name.
    pub name: String,
    /// True if the type is only produced while requested.
    pub on_demand: bool,
}

/// One gated-and-aliased attribute update inside a solver data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolutionData {
    /// Alias of the attribute type, per the announced registry.
    pub type_alias: u32,
    /// Time the value was computed.
    pub time: GrailTime,
    /// URI the value attaches to.
    pub target: Uri,
    /// Opaque attribute payload.
    pub data: Vec<u8>,
}

/// Encode a keep-alive probe or reply.
#[must_use]
pub fn encode_keep_alive() -> Bytes { message(MessageId::KeepAlive as u8).freeze() }

/// Encode a type announcement carrying `types` and the solver origin.
#[must_use]
pub fn encode_type_announce(types: &[AliasType], origin: &str) -> Bytes {
    let mut buf = message(MessageId::TypeAnnounce as u8);
    buf.put_u32(u32::try_from(types.len()).expect("type list fits a frame"));
    for entry in types {
        buf.put_u32(entry.alias);
        put_string(&mut buf, &entry.name);
        buf.put_u8(u8::from(entry.on_demand));
    }
    put_string(&mut buf, origin);
    buf.freeze()
}

/// Decode a type announcement into its entries and origin.
pub fn decode_type_announce(payload: Bytes) -> Result<(Vec<AliasType>, String), DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, MessageId::TypeAnnounce as u8)?;
    let count = get_u32(&mut buf)? as usize;
    let mut types = Vec::with_capacity(count);
    for _ in 0..count {
        types.push(AliasType {
            alias: get_u32(&mut buf)?,
            name: get_string(&mut buf)?,
            on_demand: get_u8(&mut buf)? != 0,
        });
    }
    let origin = get_string(&mut buf)?;
    Ok((types, origin))
}

fn encode_on_demand(id: MessageId, requests: &[(u32, Vec<String>)]) -> Bytes {
    let mut buf = message(id as u8);
    buf.put_u32(u32::try_from(requests.len()).expect("request list fits a frame"));
    for (alias, patterns) in requests {
        buf.put_u32(*alias);
        buf.put_u32(u32::try_from(patterns.len()).expect("pattern list fits a frame"));
        for pattern in patterns {
            put_string(&mut buf, pattern);
        }
    }
    buf.freeze()
}

fn decode_on_demand(
    payload: Bytes,
    id: MessageId,
) -> Result<Vec<(u32, Vec<String>)>, DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, id as u8)?;
    let count = get_u32(&mut buf)? as usize;
    let mut requests = Vec::with_capacity(count);
    for _ in 0..count {
        let alias = get_u32(&mut buf)?;
        let pattern_count = get_u32(&mut buf)? as usize;
        let mut patterns = Vec::with_capacity(pattern_count);
        for _ in 0..pattern_count {
            patterns.push(get_string(&mut buf)?);
        }
        requests.push((alias, patterns));
    }
    Ok(requests)
}

/// Encode an on-demand activation request.
#[must_use]
pub fn encode_start_on_demand(requests: &[(u32, Vec<String>)]) -> Bytes {
    encode_on_demand(MessageId::StartOnDemand, requests)
}

/// Decode an on-demand activation request.
pub fn decode_start_on_demand(payload: Bytes) -> Result<Vec<(u32, Vec<String>)>, DecodeError> {
    decode_on_demand(payload, MessageId::StartOnDemand)
}

/// Encode an on-demand withdrawal.
#[must_use]
pub fn encode_stop_on_demand(requests: &[(u32, Vec<String>)]) -> Bytes {
    encode_on_demand(MessageId::StopOnDemand, requests)
}

/// Decode an on-demand withdrawal.
pub fn decode_stop_on_demand(payload: Bytes) -> Result<Vec<(u32, Vec<String>)>, DecodeError> {
    decode_on_demand(payload, MessageId::StopOnDemand)
}

/// Encode a solver data message.
///
/// An empty `solutions` list is legal; the world model reads it as a
/// keep-alive heartbeat.
#[must_use]
pub fn encode_solver_data(create_uris: bool, solutions: &[SolutionData]) -> Bytes {
    let mut buf = message(MessageId::SolverData as u8);
    buf.put_u8(u8::from(create_uris));
    buf.put_u32(u32::try_from(solutions.len()).expect("solution list fits a frame"));
    for solution in solutions {
        buf.put_u32(solution.type_alias);
        buf.put_i64(solution.time);
        put_string(&mut buf, &solution.target);
        put_blob(&mut buf, &solution.data);
    }
    buf.freeze()
}

/// Decode a solver data message into its create flag and solutions.
pub fn decode_solver_data(payload: Bytes) -> Result<(bool, Vec<SolutionData>), DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, MessageId::SolverData as u8)?;
    let create_uris = get_u8(&mut buf)? != 0;
    let count = get_u32(&mut buf)? as usize;
    let mut solutions = Vec::with_capacity(count);
    for _ in 0..count {
        solutions.push(SolutionData {
            type_alias: get_u32(&mut buf)?,
            time: get_i64(&mut buf)?,
            target: get_string(&mut buf)?,
            data: get_blob(&mut buf)?,
        });
    }
    Ok((create_uris, solutions))
}

/// Encode a URI creation carrying the creation time and origin.
#[must_use]
pub fn encode_create_uri(uri: &str, created: GrailTime, origin: &str) -> Bytes {
    let mut buf = message(MessageId::CreateUri as u8);
    put_string(&mut buf, uri);
    buf.put_i64(created);
    put_string(&mut buf, origin);
    buf.freeze()
}

/// Decode a URI creation into `(uri, created, origin)`.
pub fn decode_create_uri(payload: Bytes) -> Result<(Uri, GrailTime, String), DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, MessageId::CreateUri as u8)?;
    Ok((get_string(&mut buf)?, get_i64(&mut buf)?, get_string(&mut buf)?))
}

/// Encode a URI expiration effective at `expires`.
#[must_use]
pub fn encode_expire_uri(uri: &str, expires: GrailTime, origin: &str) -> Bytes {
    let mut buf = message(MessageId::ExpireUri as u8);
    put_string(&mut buf, uri);
    buf.put_i64(expires);
    put_string(&mut buf, origin);
    buf.freeze()
}

/// Decode a URI expiration into `(uri, expires, origin)`.
pub fn decode_expire_uri(payload: Bytes) -> Result<(Uri, GrailTime, String), DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, MessageId::ExpireUri as u8)?;
    Ok((get_string(&mut buf)?, get_i64(&mut buf)?, get_string(&mut buf)?))
}

/// Encode a URI deletion.
#[must_use]
pub fn encode_delete_uri(uri: &str, origin: &str) -> Bytes {
    let mut buf = message(MessageId::DeleteUri as u8);
    put_string(&mut buf, uri);
    put_string(&mut buf, origin);
    buf.freeze()
}

/// Decode a URI deletion into `(uri, origin)`.
pub fn decode_delete_uri(payload: Bytes) -> Result<(Uri, String), DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, MessageId::DeleteUri as u8)?;
    Ok((get_string(&mut buf)?, get_string(&mut buf)?))
}

/// Encode an attribute expiration effective at `expires`.
#[must_use]
pub fn encode_expire_attribute(uri: &str, name: &str, origin: &str, expires: GrailTime) -> Bytes {
    let mut buf = message(MessageId::ExpireAttribute as u8);
    put_string(&mut buf, uri);
    put_string(&mut buf, name);
    put_string(&mut buf, origin);
    buf.put_i64(expires);
    buf.freeze()
}

/// Decode an attribute expiration into `(uri, name, origin, expires)`.
pub fn decode_expire_attribute(
    payload: Bytes,
) -> Result<(Uri, String, String, GrailTime), DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, MessageId::ExpireAttribute as u8)?;
    Ok((
        get_string(&mut buf)?,
        get_string(&mut buf)?,
        get_string(&mut buf)?,
        get_i64(&mut buf)?,
    ))
}

/// Encode an attribute deletion.
#[must_use]
pub fn encode_delete_attribute(uri: &str, name: &str, origin: &str) -> Bytes {
    let mut buf = message(MessageId::DeleteAttribute as u8);
    put_string(&mut buf, uri);
    put_string(&mut buf, name);
    put_string(&mut buf, origin);
    buf.freeze()
}

/// Decode an attribute deletion into `(uri, name, origin)`.
pub fn decode_delete_attribute(payload: Bytes) -> Result<(Uri, String, String), DecodeError> {
    let mut buf = payload;
    expect_message(&mut buf, MessageId::DeleteAttribute as u8)?;
    Ok((
        get_string(&mut buf)?,
        get_string(&mut buf)?,
        get_string(&mut buf)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_announce_round_trips_entries_and_origin() {
        let types = vec![
            AliasType {
                alias: 1,
                name: "location".to_string(),
                on_demand: false,
            },
            AliasType {
                alias: 2,
                name: "proximity".to_string(),
                on_demand: true,
            },
        ];
        let (decoded, origin) = decode_type_announce(encode_type_announce(&types, "tracker"))
            .expect("decode type announce");
        assert_eq!(decoded, types);
        assert_eq!(origin, "tracker");
    }

    #[test]
    fn empty_solver_data_still_encodes_a_message() {
        let payload = encode_solver_data(true, &[]);
        let (create_uris, solutions) = decode_solver_data(payload).expect("decode solver data");
        assert!(create_uris);
        assert!(solutions.is_empty());
    }

    #[test]
    fn on_demand_requests_keep_pattern_grouping() {
        let requests = vec![
            (2, vec!["^u[0-9]+$".to_string(), "lobby\\..*".to_string()]),
            (5, Vec::new()),
        ];
        let decoded = decode_start_on_demand(encode_start_on_demand(&requests))
            .expect("decode start on demand");
        assert_eq!(decoded, requests);
    }
}
