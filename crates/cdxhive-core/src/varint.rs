//! Variable-length Integer Encoding (Varint)
//!
//! This module provides the variable-length encoding used by packed capture
//! values:
//!
//! ## Varint Encoding
//! Instead of always using 8 bytes for a u64, varints use only as many bytes as
//! needed:
//! - Small numbers (0-127) use just 1 byte
//! - Larger numbers use 2-10 bytes depending on magnitude
//! - Each byte uses 7 bits for data and 1 bit as a "continuation" flag
//!
//! Signed values are encoded as their two's-complement u64 bit pattern, so a
//! negative number always takes 10 bytes. Capture values only use negatives for
//! the "absent" sentinel (-1), so this costs little in practice and keeps
//! non-negative values bytewise identical to their unsigned encoding.
//!
//! ## Strings and Byte Arrays
//! Strings and byte arrays are stored length-prefixed: a varint byte count
//! followed by the raw bytes. Strings are ASCII in practice (urlkeys and CDX
//! fields) but arbitrary bytes round-trip unharmed.
//!
//! ## Usage
//! ```ignore
//! let mut buf = BytesMut::new();
//! encode_i64(&mut buf, -1);
//! let value = decode_i64(&mut buf.freeze())?;
//! ```

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Encode an unsigned integer as a varint
pub fn encode_u64(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80; // Set continuation bit
        }

        buf.put_u8(byte);

        if value == 0 {
            break;
        }
    }
}

/// Encode a signed integer as the varint of its two's-complement bit pattern
pub fn encode_i64(buf: &mut impl BufMut, value: i64) {
    encode_u64(buf, value as u64);
}

/// Decode a varint to an unsigned integer
pub fn decode_u64(buf: &mut impl Buf) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;

    loop {
        if !buf.has_remaining() {
            return Err(Error::Truncated);
        }
        let byte = buf.get_u8();
        value |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            break;
        }

        shift += 7;

        if shift >= 64 {
            return Err(Error::Truncated);
        }
    }

    Ok(value)
}

/// Decode a varint to a signed integer
pub fn decode_i64(buf: &mut impl Buf) -> Result<i64> {
    Ok(decode_u64(buf)? as i64)
}

/// Encode a length-prefixed byte array
pub fn encode_bytes(buf: &mut impl BufMut, value: &[u8]) {
    encode_u64(buf, value.len() as u64);
    buf.put_slice(value);
}

/// Decode a length-prefixed byte array
pub fn decode_bytes(buf: &mut impl Buf) -> Result<Vec<u8>> {
    let len = decode_u64(buf)? as usize;
    if buf.remaining() < len {
        return Err(Error::Truncated);
    }
    let mut value = vec![0u8; len];
    buf.copy_to_slice(&mut value);
    Ok(value)
}

/// Encode a length-prefixed string
pub fn encode_str(buf: &mut impl BufMut, value: &str) {
    encode_bytes(buf, value.as_bytes());
}

/// Decode a length-prefixed string, replacing any invalid UTF-8
pub fn decode_str(buf: &mut impl Buf) -> Result<String> {
    let bytes = decode_bytes(buf)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn round_trip(value: i64) {
        let mut buf = BytesMut::new();
        encode_i64(&mut buf, value);
        let mut cursor = buf.as_ref();
        let decoded = decode_i64(&mut cursor).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(cursor.len(), 0, "Buffer should be fully consumed");
    }

    #[test]
    fn test_varint_round_trip() {
        round_trip(632662171617822);
        round_trip(0);
        round_trip(-1);
        round_trip(-42);
        round_trip(i64::MIN);
        round_trip(i64::MAX);
    }

    #[test]
    fn test_ascii_round_trip() {
        let mut buf = BytesMut::new();
        encode_str(&mut buf, "hello world");
        let mut cursor = buf.as_ref();
        assert_eq!(decode_str(&mut cursor).unwrap(), "hello world");
        assert_eq!(cursor.len(), 0);
    }

    // ---------------------------------------------------------------
    // Byte-size expectations
    // ---------------------------------------------------------------

    #[test]
    fn test_small_values_are_one_byte() {
        for value in [0u64, 1, 42, 127] {
            let mut buf = BytesMut::new();
            encode_u64(&mut buf, value);
            assert_eq!(buf.len(), 1, "value {} should encode to 1 byte", value);
        }
    }

    #[test]
    fn test_negative_values_are_ten_bytes() {
        // Two's-complement bit patterns of negatives have the top bit set,
        // so they always take the maximum 10 bytes.
        for value in [-1i64, -42, i64::MIN] {
            let mut buf = BytesMut::new();
            encode_i64(&mut buf, value);
            assert_eq!(buf.len(), 10, "value {} should encode to 10 bytes", value);
        }
    }

    #[test]
    fn test_seven_bit_boundaries() {
        let boundaries = [
            (1u64 << 7, 2),
            (1u64 << 14, 3),
            (1u64 << 21, 4),
            (1u64 << 28, 5),
            (1u64 << 35, 6),
            (1u64 << 42, 7),
            (1u64 << 49, 8),
            (1u64 << 56, 9),
            (1u64 << 63, 10),
        ];
        for (value, expected_bytes) in boundaries {
            let mut buf = BytesMut::new();
            encode_u64(&mut buf, value);
            assert_eq!(
                buf.len(),
                expected_bytes,
                "Value {} should encode to {} bytes, got {}",
                value,
                expected_bytes,
                buf.len()
            );
            let mut cursor = buf.as_ref();
            assert_eq!(decode_u64(&mut cursor).unwrap(), value);
        }
    }

    // ---------------------------------------------------------------
    // Sequential fields in the same buffer
    // ---------------------------------------------------------------

    #[test]
    fn test_mixed_fields_sequential() {
        let mut buf = BytesMut::new();
        encode_str(&mut buf, "org,example)/");
        encode_i64(&mut buf, 200);
        encode_i64(&mut buf, -1);
        encode_bytes(&mut buf, &[0xde, 0xad, 0xbe, 0xef]);
        encode_u64(&mut buf, 20140101123400);

        let mut cursor = buf.as_ref();
        assert_eq!(decode_str(&mut cursor).unwrap(), "org,example)/");
        assert_eq!(decode_i64(&mut cursor).unwrap(), 200);
        assert_eq!(decode_i64(&mut cursor).unwrap(), -1);
        assert_eq!(decode_bytes(&mut cursor).unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(decode_u64(&mut cursor).unwrap(), 20140101123400);
        assert_eq!(cursor.len(), 0);
    }

    // ---------------------------------------------------------------
    // Truncated input
    // ---------------------------------------------------------------

    #[test]
    fn test_decode_empty_buffer_is_error() {
        let mut cursor: &[u8] = &[];
        assert!(matches!(decode_u64(&mut cursor), Err(Error::Truncated)));
    }

    #[test]
    fn test_decode_dangling_continuation_bit_is_error() {
        let mut cursor: &[u8] = &[0x80];
        assert!(matches!(decode_u64(&mut cursor), Err(Error::Truncated)));
    }

    #[test]
    fn test_decode_truncated_string_is_error() {
        // Length prefix says 100 bytes but only 3 follow.
        let mut cursor: &[u8] = &[100, b'a', b'b', b'c'];
        assert!(matches!(decode_str(&mut cursor), Err(Error::Truncated)));
    }
}
