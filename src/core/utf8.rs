//! Code-point level UTF-8 encoding used for routes and handshake bodies.
//!
//! The wire format is defined in terms of UTF-8 bytes, so the codec walks code
//! points and emits bytes itself instead of relying on the in-memory string
//! representation.

use crate::error::{constants, ProtocolError, Result};

/// Number of bytes `s` occupies once encoded.
pub fn encoded_len(s: &str) -> usize {
    s.chars().map(|c| width(c as u32)).sum()
}

#[inline]
fn width(cp: u32) -> usize {
    match cp {
        0..=0x7F => 1,
        0x80..=0x7FF => 2,
        0x800..=0xFFFF => 3,
        _ => 4,
    }
}

/// Append the UTF-8 encoding of `s` to `out`.
pub fn encode_into(s: &str, out: &mut Vec<u8>) {
    out.reserve(encoded_len(s));
    for c in s.chars() {
        let cp = c as u32;
        match width(cp) {
            1 => out.push(cp as u8),
            2 => {
                out.push(0xC0 | (cp >> 6) as u8);
                out.push(0x80 | (cp & 0x3F) as u8);
            }
            3 => {
                out.push(0xE0 | (cp >> 12) as u8);
                out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
                out.push(0x80 | (cp & 0x3F) as u8);
            }
            // Supplementary planes never appear in route identifiers but a
            // handshake body may carry them.
            _ => {
                out.push(0xF0 | (cp >> 18) as u8);
                out.push(0x80 | ((cp >> 12) & 0x3F) as u8);
                out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
                out.push(0x80 | (cp & 0x3F) as u8);
            }
        }
    }
}

/// Encode `s` into a fresh buffer.
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(s));
    encode_into(s, &mut out);
    out
}

/// Decode UTF-8 bytes into a string, rejecting malformed, overlong and
/// surrogate sequences.
pub fn decode(bytes: &[u8]) -> Result<String> {
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let lead = bytes[i];
        let (len, init, min) = match lead {
            0x00..=0x7F => (1, lead as u32, 0),
            0xC0..=0xDF => (2, (lead & 0x1F) as u32, 0x80),
            0xE0..=0xEF => (3, (lead & 0x0F) as u32, 0x800),
            0xF0..=0xF7 => (4, (lead & 0x07) as u32, 0x1_0000),
            _ => return Err(invalid()),
        };

        if i + len > bytes.len() {
            return Err(invalid());
        }

        let mut cp = init;
        for &b in &bytes[i + 1..i + len] {
            if b & 0xC0 != 0x80 {
                return Err(invalid());
            }
            cp = (cp << 6) | (b & 0x3F) as u32;
        }

        if cp < min {
            return Err(invalid());
        }
        let c = char::from_u32(cp).ok_or_else(invalid)?;
        out.push(c);
        i += len;
    }

    Ok(out)
}

fn invalid() -> ProtocolError {
    ProtocolError::MalformedMessage(constants::ERR_INVALID_UTF8.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_follow_code_point_ranges() {
        assert_eq!(encode("a"), b"a".to_vec());
        assert_eq!(encode("é"), vec![0xC3, 0xA9]);
        assert_eq!(encode("中"), vec![0xE4, 0xB8, 0xAD]);
        assert_eq!(encoded_len("a.é.中"), 1 + 1 + 2 + 1 + 3);
    }

    #[test]
    fn matches_native_encoding() {
        let s = "chat.chatHandler.send/ünïcødé/日本語/🎮";
        assert_eq!(encode(s), s.as_bytes());
        assert_eq!(decode(s.as_bytes()).unwrap(), s);
    }

    #[test]
    fn rejects_malformed_sequences() {
        assert!(decode(&[0xC3]).is_err());
        assert!(decode(&[0xE4, 0x41, 0xAD]).is_err());
        // overlong encoding of '/'
        assert!(decode(&[0xC0, 0xAF]).is_err());
        // UTF-16 surrogate half
        assert!(decode(&[0xED, 0xA0, 0x80]).is_err());
        assert!(decode(&[0xFF]).is_err());
    }
}
