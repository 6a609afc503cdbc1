//! Outer framing layer.
//!
//! ```text
//! [type: u8] [length: u24 big-endian] [body: length bytes]
//! ```
//!
//! Every length is bounds-checked against the available input before any
//! bytes are copied.

use crate::error::{constants, ProtocolError, Result};

/// Size of the package head: one type byte plus a 24-bit length.
pub const HEADER_SIZE: usize = 4;

/// Largest body expressible in the 24-bit length field.
pub const MAX_BODY_SIZE: usize = 0x00FF_FFFF;

/// Package types carried in the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PackageType {
    Handshake = 1,
    HandshakeAck = 2,
    Heartbeat = 3,
    Data = 4,
    Kick = 5,
}

impl PackageType {
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PackageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PackageType::Handshake),
            2 => Ok(PackageType::HandshakeAck),
            3 => Ok(PackageType::Heartbeat),
            4 => Ok(PackageType::Data),
            5 => Ok(PackageType::Kick),
            other => Err(ProtocolError::UnknownPackageType(other)),
        }
    }
}

/// A single frame of the outer protocol. An empty body is the absent body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub kind: PackageType,
    pub body: Vec<u8>,
}

impl Package {
    pub fn new(kind: PackageType, body: Vec<u8>) -> Self {
        Self { kind, body }
    }

    /// A package without body (heartbeat, handshake ack).
    pub fn empty(kind: PackageType) -> Self {
        Self {
            kind,
            body: Vec::new(),
        }
    }

    /// Encode a package from its parts.
    ///
    /// # Errors
    /// Returns `ProtocolError::OversizedPackage` if the body does not fit in 24 bits.
    pub fn encode(kind: PackageType, body: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        write_header(kind, body.len(), &mut out)?;
        out.extend_from_slice(body);
        Ok(out)
    }

    /// Serialize this package into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Self::encode(self.kind, &self.body)
    }

    /// Parse exactly one package from `data`.
    ///
    /// # Errors
    /// Fails on a truncated head or body, an unknown type byte, or bytes left
    /// over after the declared body.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (package, used) = Self::decode_prefix(data)?;
        if used != data.len() {
            return Err(ProtocolError::MalformedPackage(
                constants::ERR_TRAILING_BYTES.to_string(),
            ));
        }
        Ok(package)
    }

    /// Parse every package in `data`. Datagram and WebSocket transports deliver
    /// whole frames, and a single frame may hold several packages back to back.
    pub fn decode_all(data: &[u8]) -> Result<Vec<Package>> {
        let mut packages = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let (package, used) = Self::decode_prefix(&data[offset..])?;
            packages.push(package);
            offset += used;
        }
        Ok(packages)
    }

    /// Parse the package at the start of `data`, returning it together with the
    /// number of bytes it occupied.
    pub fn decode_prefix(data: &[u8]) -> Result<(Self, usize)> {
        let (kind, len) = read_header(data)?;
        let end = HEADER_SIZE + len;
        if data.len() < end {
            return Err(ProtocolError::MalformedPackage(
                constants::ERR_TRUNCATED_BODY.to_string(),
            ));
        }
        Ok((
            Package {
                kind,
                body: data[HEADER_SIZE..end].to_vec(),
            },
            end,
        ))
    }
}

/// Write the 4-byte head for a body of `len` bytes.
pub(crate) fn write_header(kind: PackageType, len: usize, out: &mut Vec<u8>) -> Result<()> {
    if len > MAX_BODY_SIZE {
        return Err(ProtocolError::OversizedPackage(len));
    }
    out.push(kind.as_u8());
    out.push((len >> 16) as u8);
    out.push((len >> 8) as u8);
    out.push(len as u8);
    Ok(())
}

/// Read the head at the start of `data`: package type and declared body length.
pub(crate) fn read_header(data: &[u8]) -> Result<(PackageType, usize)> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::MalformedPackage(
            constants::ERR_TRUNCATED_HEADER.to_string(),
        ));
    }
    let kind = PackageType::try_from(data[0])?;
    Ok((kind, body_len(data)))
}

#[inline]
pub(crate) fn body_len(head: &[u8]) -> usize {
    ((head[1] as usize) << 16) | ((head[2] as usize) << 8) | head[3] as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_layout_is_type_then_big_endian_length() {
        let bytes = Package::encode(PackageType::Data, &[0xAA; 0x0102]).unwrap();
        assert_eq!(&bytes[..4], &[4, 0x00, 0x01, 0x02]);
        assert_eq!(bytes.len(), 4 + 0x0102);
    }

    #[test]
    fn absent_body_is_zero_length() {
        let bytes = Package::empty(PackageType::Heartbeat).to_bytes().unwrap();
        assert_eq!(bytes, vec![3, 0, 0, 0]);
        let decoded = Package::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.kind, PackageType::Heartbeat);
        assert!(decoded.body.is_empty());
    }

    #[test]
    fn declared_length_beyond_input_is_rejected() {
        let result = Package::from_bytes(&[4, 0xFF, 0xFF, 0xFF, 1, 2, 3]);
        assert!(matches!(result, Err(ProtocolError::MalformedPackage(_))));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = Package::from_bytes(&[9, 0, 0, 0]);
        assert!(matches!(result, Err(ProtocolError::UnknownPackageType(9))));
    }

    #[test]
    fn decode_all_splits_concatenated_packages() {
        let mut data = Package::encode(PackageType::Heartbeat, &[]).unwrap();
        data.extend(Package::encode(PackageType::Data, b"xyz").unwrap());
        let packages = Package::decode_all(&data).unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[1], Package::new(PackageType::Data, b"xyz".to_vec()));
    }

    #[test]
    fn oversized_body_fails_to_encode() {
        let body = vec![0u8; MAX_BODY_SIZE + 1];
        assert!(matches!(
            Package::encode(PackageType::Data, &body),
            Err(ProtocolError::OversizedPackage(_))
        ));
    }
}
