//! Base32 Digest Coding
//!
//! CDX digests are conventionally RFC 4648 base32 text (a 20 byte SHA-1 becomes
//! exactly 32 characters). Packed values from version 1 onwards store the raw
//! decoded bytes instead of the text, so this module converts between the two.
//!
//! The encoder pads short trailing groups with zero bits and never emits `=`
//! padding. The decoder is lenient: characters outside the alphabet (including
//! `=` and the placeholder digest `-`) are skipped, so a placeholder decodes to
//! an empty byte array rather than failing.

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Encode bytes as unpadded base32 text
pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    for chunk in data.chunks(5) {
        let mut buf: u64 = 0;
        for i in 0..5 {
            buf <<= 8;
            if i < chunk.len() {
                buf |= chunk[i] as u64;
            }
        }
        for j in 0..8 {
            let index = ((buf >> ((7 - j) * 5)) & 31) as usize;
            out.push(ALPHABET[index] as char);
        }
    }
    out
}

/// Decode base32 text to bytes, skipping characters outside the alphabet
pub fn decode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 5 / 8);
    let mut acc: u64 = 0;
    let mut bits = 0;
    for c in text.bytes() {
        let value = match c {
            b'A'..=b'Z' => (c - b'A') as u64,
            b'2'..=b'7' => (c - b'2' + 26) as u64,
            _ => continue,
        };
        acc = (acc << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_zero_bytes() {
        assert_eq!(encode(&[0, 0, 0, 0, 0]), "AAAAAAAA");
    }

    #[test]
    fn test_encode_all_ones() {
        assert_eq!(encode(&[0xff; 5]), "77777777");
    }

    #[test]
    fn test_sha1_digest_round_trip() {
        let digest = "2HQQSVUDLU4NZ67TN2KS3NG5AIVBVNFB";
        let bytes = decode(digest);
        assert_eq!(bytes.len(), 20);
        assert_eq!(encode(&bytes), digest);
    }

    #[test]
    fn test_decode_skips_placeholder() {
        assert_eq!(decode("-"), Vec::<u8>::new());
        assert_eq!(encode(&decode("-")), "");
    }

    #[test]
    fn test_decode_skips_padding_and_whitespace() {
        assert_eq!(decode("MFRGG==="), decode("MFRGG"));
        assert_eq!(decode("MF RG\nG"), decode("MFRGG"));
    }

    #[test]
    fn test_short_group_zero_padded() {
        // One byte encodes into a full 8 character group.
        let text = encode(&[0x61]);
        assert_eq!(text.len(), 8);
        assert_eq!(decode(&text), vec![0x61, 0, 0, 0, 0]);
    }
}
