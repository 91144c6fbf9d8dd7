//! Binary payload codec.
//!
//! Payloads are bincode with fixed-width little-endian integers, so every
//! record has a predictable size: `u32` is 4 bytes, `u64` and `f64` are 8,
//! `bool` is 1, and strings and vectors carry a `u64` length prefix. A frame
//! is the `i32` tag followed by the payload.

use bincode::Options;
use satfarm_base::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::window::ABSOLUTE_MAX_PAYLOAD;

/// Size of the tag that precedes every payload.
pub const TAG_LEN: usize = 4;

/// Size of the length prefix of strings and vectors.
pub const LEN_PREFIX: usize = 8;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
        .with_limit(ABSOLUTE_MAX_PAYLOAD as u64)
}

/// Encodes a payload; anything beyond the absolute maximum is refused.
pub fn encode<T: Serialize + ?Sized>(value: &T, channel: &'static str) -> Result<Vec<u8>> {
    options().serialize(value).map_err(|e| match *e {
        bincode::ErrorKind::SizeLimit => Error::Rejected(format!(
            "{channel} payload exceeds the {ABSOLUTE_MAX_PAYLOAD} byte maximum"
        )),
        other => Error::Internal(format!("{channel} payload encoding failed: {other}")),
    })
}

/// Decodes a complete payload. Truncation, leftovers and malformed fields
/// are protocol violations on `channel`.
pub fn decode<T: DeserializeOwned>(payload: &[u8], channel: &'static str) -> Result<T> {
    options()
        .deserialize(payload)
        .map_err(|e| Error::protocol(channel, format!("malformed payload: {e}")))
}

/// Encoded size of a string or vector of `len` bytes.
#[must_use]
pub const fn prefixed_len(len: usize) -> usize {
    LEN_PREFIX + len
}

/// Prefixes a payload with its tag.
#[must_use]
pub fn frame(tag: i32, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(TAG_LEN + payload.len());
    framed.extend_from_slice(&tag.to_le_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Splits a frame into tag and payload.
pub fn split_frame<'a>(data: &'a [u8], channel: &'static str) -> Result<(i32, &'a [u8])> {
    if data.len() < TAG_LEN {
        return Err(Error::protocol(
            channel,
            format!("frame of {} bytes has no tag", data.len()),
        ));
    }
    let (tag, payload) = data.split_at(TAG_LEN);
    let mut bytes = [0u8; TAG_LEN];
    bytes.copy_from_slice(tag);
    Ok((i32::from_le_bytes(bytes), payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_layout() {
        let bytes = encode(&(1u32, 2u64, true), "S2W").unwrap();
        assert_eq!(bytes, [1, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_string_prefix() {
        let bytes = encode("ab", "M2S").unwrap();
        assert_eq!(bytes.len(), prefixed_len(2));
        assert_eq!(bytes, [2, 0, 0, 0, 0, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn test_truncated_payload_is_protocol_error() {
        let err = decode::<u32>(&[1, 2, 3], "W2S").unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_string_length_beyond_payload() {
        let mut bytes = 100u64.to_le_bytes().to_vec();
        bytes.push(b'a');
        assert!(decode::<String>(&bytes, "M2S").unwrap_err().is_protocol());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.push(0xff);
        assert!(decode::<String>(&bytes, "M2S").unwrap_err().is_protocol());
    }

    #[test]
    fn test_oversized_payload_rejected_on_encode() {
        let long = "x".repeat(ABSOLUTE_MAX_PAYLOAD);
        assert!(matches!(encode(&long, "S2W"), Err(Error::Rejected(_))));
    }

    #[test]
    fn test_invalid_bool_byte() {
        assert!(decode::<bool>(&[2], "S2M").unwrap_err().is_protocol());
    }

    #[test]
    fn test_trailing_bytes() {
        assert!(decode::<u32>(&[0, 0, 0, 0, 9], "S2W")
            .unwrap_err()
            .is_protocol());
    }

    #[test]
    fn test_frame_split() {
        let framed = frame(3, &[7, 8]);
        let (tag, payload) = split_frame(&framed, "S2W").unwrap();
        assert_eq!(tag, 3);
        assert_eq!(payload, &[7, 8]);
        assert!(split_frame(&[1, 0], "S2W").is_err());
    }
}
