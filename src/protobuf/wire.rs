//! Varint, zig-zag and tag primitives of the structured codec.

use crate::error::{constants, ProtocolError, Result};

/// Wire type carried in the low three bits of a field tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            other => Err(ProtocolError::MalformedMessage(format!(
                "unsupported wire type {other}"
            ))),
        }
    }
}

/// Append `value` as an unsigned base-128 varint, least significant group first.
pub fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Read a varint at `*pos`, advancing the cursor.
pub fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let b = *buf.get(*pos).ok_or_else(|| {
            ProtocolError::MalformedMessage(constants::ERR_TRUNCATED_VARINT.to_string())
        })?;
        *pos += 1;
        if shift >= 64 || (shift == 63 && b > 1) {
            return Err(ProtocolError::MalformedMessage(
                "varint exceeds 64 bits".to_string(),
            ));
        }
        value |= ((b & 0x7F) as u64) << shift;
        if b & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// `n < 0 ? 2|n| - 1 : 2n`
#[inline]
pub fn zigzag_encode(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[inline]
pub fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Append the key of a field: `(tag << 3) | wire_type`.
#[inline]
pub fn write_tag(tag: u32, wire: WireType, out: &mut Vec<u8>) {
    write_varint(((tag as u64) << 3) | wire as u64, out);
}

/// Read a field key, returning the field tag and its wire type.
pub fn read_tag(buf: &[u8], pos: &mut usize) -> Result<(u32, WireType)> {
    let key = read_varint(buf, pos)?;
    let wire = WireType::try_from((key & 0x07) as u8)?;
    let tag = u32::try_from(key >> 3)
        .map_err(|_| ProtocolError::MalformedMessage(format!("field tag {} too large", key >> 3)))?;
    Ok((tag, wire))
}

/// Take `len` bytes at `*pos`, advancing the cursor.
pub fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos.checked_add(len).filter(|end| *end <= buf.len()).ok_or_else(|| {
        ProtocolError::MalformedMessage(constants::ERR_TRUNCATED_FIELD.to_string())
    })?;
    let slice = &buf[*pos..end];
    *pos = end;
    Ok(slice)
}

/// Skip a field of unknown tag.
pub fn skip_field(buf: &[u8], pos: &mut usize, wire: WireType) -> Result<()> {
    match wire {
        WireType::Varint => {
            read_varint(buf, pos)?;
        }
        WireType::Fixed64 => {
            take(buf, pos, 8)?;
        }
        WireType::Fixed32 => {
            take(buf, pos, 4)?;
        }
        WireType::LengthDelimited => {
            let len = read_varint(buf, pos)? as usize;
            take(buf, pos, len)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zigzag_matches_reference_formula() {
        for n in [-3i64, -2, -1, 0, 1, 2, 3, i32::MIN as i64, i64::MAX, i64::MIN] {
            if n != i64::MIN {
                let expected = if n < 0 {
                    2 * n.unsigned_abs() - 1
                } else {
                    2 * n as u64
                };
                assert_eq!(zigzag_encode(n), expected, "{n}");
            }
            assert_eq!(zigzag_decode(zigzag_encode(n)), n);
        }
    }

    #[test]
    fn varint_layout() {
        let mut out = Vec::new();
        write_varint(300, &mut out);
        assert_eq!(out, vec![0xAC, 0x02]);
        let mut pos = 0;
        assert_eq!(read_varint(&out, &mut pos).unwrap(), 300);
        assert_eq!(pos, 2);
    }

    #[test]
    fn tag_packs_wire_type() {
        let mut out = Vec::new();
        write_tag(2, WireType::LengthDelimited, &mut out);
        assert_eq!(out, vec![(2 << 3) | 2]);
        let mut pos = 0;
        assert_eq!(
            read_tag(&out, &mut pos).unwrap(),
            (2, WireType::LengthDelimited)
        );
    }

    #[test]
    fn truncated_varint_fails() {
        let mut pos = 0;
        assert!(read_varint(&[0x80, 0x80], &mut pos).is_err());
    }

    #[test]
    fn take_is_bounds_checked() {
        let mut pos = 2;
        assert!(take(&[1, 2, 3], &mut pos, 5).is_err());
        assert!(take(&[1, 2, 3], &mut pos, usize::MAX).is_err());
    }
}
