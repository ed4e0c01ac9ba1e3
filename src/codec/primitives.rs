//! Checked reads and writes for the wire primitive types.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::DecodeError;

pub(super) fn need(buf: &Bytes, n: usize) -> Result<(), DecodeError> {
    if buf.remaining() < n {
        return Err(DecodeError::Truncated {
            needed: n - buf.remaining(),
        });
    }
    Ok(())
}

pub(super) fn get_u8(buf: &mut Bytes) -> Result<u8, DecodeError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

pub(super) fn get_u32(buf: &mut Bytes) -> Result<u32, DecodeError> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

pub(super) fn get_u64(buf: &mut Bytes) -> Result<u64, DecodeError> {
    need(buf, 8)?;
    Ok(buf.get_u64())
}

pub(super) fn get_i64(buf: &mut Bytes) -> Result<i64, DecodeError> {
    need(buf, 8)?;
    Ok(buf.get_i64())
}

pub(super) fn get_f32(buf: &mut Bytes) -> Result<f32, DecodeError> {
    need(buf, 4)?;
    Ok(buf.get_f32())
}

/// Write a string as a u32 byte length followed by UTF-16BE code units.
pub(super) fn put_string(buf: &mut BytesMut, value: &str) {
    let units: Vec<u16> = value.encode_utf16().collect();
    buf.put_u32(u32::try_from(units.len() * 2).expect("string fits a frame"));
    for unit in units {
        buf.put_u16(unit);
    }
}

pub(super) fn get_string(buf: &mut Bytes) -> Result<String, DecodeError> {
    let len = get_u32(buf)? as usize;
    need(buf, len)?;
    if len % 2 != 0 {
        return Err(DecodeError::InvalidString);
    }
    let units: Vec<u16> = (0..len / 2).map(|_| buf.get_u16()).collect();
    String::from_utf16(&units).map_err(|_| DecodeError::InvalidString)
}

/// Write an opaque payload as a u32 length followed by raw bytes.
pub(super) fn put_blob(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32(u32::try_from(value.len()).expect("payload fits a frame"));
    buf.put_slice(value);
}

pub(super) fn get_blob(buf: &mut Bytes) -> Result<Vec<u8>, DecodeError> {
    let len = get_u32(buf)? as usize;
    need(buf, len)?;
    let mut data = vec![0_u8; len];
    buf.copy_to_slice(&mut data);
    Ok(data)
}

/// Start an outbound message with its id byte.
pub(super) fn message(id: u8) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(id);
    buf
}

/// Consume and verify the id byte of an inbound payload.
pub(super) fn expect_message(buf: &mut Bytes, expected: u8) -> Result<(), DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::EmptyFrame);
    }
    let actual = buf.get_u8();
    if actual != expected {
        return Err(DecodeError::UnexpectedMessage { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::ascii("hallway sensor")]
    #[case::empty("")]
    #[case::beyond_latin("зал-7")]
    #[case::astral("area-𝔸")]
    fn strings_survive_utf16_transcoding(#[case] value: &str) {
        let mut buf = BytesMut::new();
        put_string(&mut buf, value);
        let mut bytes = buf.freeze();
        assert_eq!(get_string(&mut bytes).expect("decode string"), value);
        assert!(bytes.is_empty());
    }

    #[test]
    fn truncated_string_reports_missing_bytes() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "corridor");
        let mut bytes = buf.freeze().slice(..6);
        assert!(matches!(
            get_string(&mut bytes),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn odd_length_string_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_slice(&[0, 0x61, 0]);
        let mut bytes = buf.freeze();
        assert!(matches!(
            get_string(&mut bytes),
            Err(DecodeError::InvalidString)
        ));
    }

    #[test]
    fn message_id_mismatch_is_surfaced() {
        let mut bytes = Bytes::from_static(&[7, 0, 0]);
        let err = expect_message(&mut bytes, 4).expect_err("wrong id");
        assert!(matches!(
            err,
            DecodeError::UnexpectedMessage {
                expected: 4,
                actual: 7
            }
        ));
    }
}
