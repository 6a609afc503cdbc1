//! Inner envelope carried in DATA packages.
//!
//! ```text
//! [flag: u8] [id: base-128 varint]? [route]? [body: rest]
//!   flag  = (type << 1) | compressRoute
//!   id    = present for REQUEST and RESPONSE, most significant group first
//!   route = present for REQUEST, NOTIFY and PUSH
//!           compressed:   code u16 big-endian
//!           uncompressed: len u8 + utf-8 bytes
//! ```

use crate::core::utf8;
use crate::error::{constants, ProtocolError, Result};

/// Largest compressed route code.
pub const MAX_ROUTE_CODE: u32 = 0xFFFF;

/// Largest encoded length of an uncompressed route.
pub const MAX_ROUTE_LEN: usize = 0xFF;

const TYPE_MASK: u8 = 0x07;
const COMPRESS_ROUTE_MASK: u8 = 0x01;

/// Maximum number of 7-bit groups in a 64-bit id.
const MAX_ID_GROUPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Notify = 1,
    Response = 2,
    Push = 3,
}

impl MessageType {
    /// REQUEST and RESPONSE carry an id.
    #[inline]
    pub fn has_id(self) -> bool {
        matches!(self, MessageType::Request | MessageType::Response)
    }

    /// REQUEST, NOTIFY and PUSH carry a route.
    #[inline]
    pub fn has_route(self) -> bool {
        matches!(
            self,
            MessageType::Request | MessageType::Notify | MessageType::Push
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Notify),
            2 => Ok(MessageType::Response),
            3 => Ok(MessageType::Push),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// A route is either a dictionary code (compressed) or a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Code(u32),
    Name(String),
}

impl Route {
    #[inline]
    pub fn is_compressed(&self) -> bool {
        matches!(self, Route::Code(_))
    }
}

impl From<&str> for Route {
    fn from(value: &str) -> Self {
        Route::Name(value.to_string())
    }
}

impl From<String> for Route {
    fn from(value: String) -> Self {
        Route::Name(value)
    }
}

/// Decoded message envelope.
///
/// `id` is `0` for messages that expect no response. `route` is `None` for
/// RESPONSE messages; a route-bearing message encoded without one decodes with
/// an empty route name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub kind: MessageType,
    pub route: Option<Route>,
    pub body: Vec<u8>,
}

impl Message {
    pub fn request(id: u64, route: impl Into<Route>, body: Vec<u8>) -> Self {
        Self {
            id,
            kind: MessageType::Request,
            route: Some(route.into()),
            body,
        }
    }

    pub fn notify(route: impl Into<Route>, body: Vec<u8>) -> Self {
        Self {
            id: 0,
            kind: MessageType::Notify,
            route: Some(route.into()),
            body,
        }
    }

    pub fn response(id: u64, body: Vec<u8>) -> Self {
        Self {
            id,
            kind: MessageType::Response,
            route: None,
            body,
        }
    }

    pub fn push(route: impl Into<Route>, body: Vec<u8>) -> Self {
        Self {
            id: 0,
            kind: MessageType::Push,
            route: Some(route.into()),
            body,
        }
    }

    #[inline]
    pub fn compress_route(&self) -> bool {
        self.route.as_ref().is_some_and(Route::is_compressed)
    }

    /// Route name if the route is uncompressed.
    pub fn route_name(&self) -> Option<&str> {
        match &self.route {
            Some(Route::Name(name)) => Some(name),
            _ => None,
        }
    }

    /// Serialize the envelope.
    ///
    /// # Errors
    /// Returns `ProtocolError::RouteOverflow` if a string route is longer than
    /// 255 encoded bytes or a route code is above 65535.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(1 + MAX_ID_GROUPS + 2 + self.body.len());
        let flag = ((self.kind as u8) << 1) | self.compress_route() as u8;
        out.push(flag);

        if self.kind.has_id() {
            encode_id(self.id, &mut out);
        }

        if self.kind.has_route() {
            match &self.route {
                Some(Route::Code(code)) => {
                    if *code > MAX_ROUTE_CODE {
                        return Err(ProtocolError::RouteOverflow(format!(
                            "route code {code} exceeds {MAX_ROUTE_CODE}"
                        )));
                    }
                    out.push((code >> 8) as u8);
                    out.push(*code as u8);
                }
                Some(Route::Name(name)) if !name.is_empty() => {
                    let len = utf8::encoded_len(name);
                    if len > MAX_ROUTE_LEN {
                        return Err(ProtocolError::RouteOverflow(format!(
                            "route is {len} bytes, limit is {MAX_ROUTE_LEN}"
                        )));
                    }
                    out.push(len as u8);
                    utf8::encode_into(name, &mut out);
                }
                _ => out.push(0),
            }
        }

        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// Parse an envelope. Bytes left after the header fields are the body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let flag = *data.first().ok_or_else(|| {
            ProtocolError::MalformedMessage(constants::ERR_EMPTY_MESSAGE.to_string())
        })?;
        let compressed = flag & COMPRESS_ROUTE_MASK == COMPRESS_ROUTE_MASK;
        let kind = MessageType::try_from((flag >> 1) & TYPE_MASK)?;
        let mut offset = 1;

        let id = if kind.has_id() {
            let (id, used) = decode_id(&data[offset..])?;
            offset += used;
            id
        } else {
            0
        };

        let route = if kind.has_route() {
            if compressed {
                let code = data.get(offset..offset + 2).ok_or_else(truncated_route)?;
                offset += 2;
                Some(Route::Code(((code[0] as u32) << 8) | code[1] as u32))
            } else {
                let len = *data.get(offset).ok_or_else(truncated_route)? as usize;
                offset += 1;
                let raw = data.get(offset..offset + len).ok_or_else(truncated_route)?;
                offset += len;
                Some(Route::Name(utf8::decode(raw)?))
            }
        } else {
            None
        };

        Ok(Message {
            id,
            kind,
            route,
            body: data[offset..].to_vec(),
        })
    }
}

/// Append `id` as big-endian base-128: minimal groups, most significant first,
/// high bit set on every group but the last.
pub fn encode_id(id: u64, out: &mut Vec<u8>) {
    let mut groups = [0u8; MAX_ID_GROUPS];
    let mut count = 0;
    let mut rest = id;
    loop {
        groups[count] = (rest & 0x7F) as u8;
        count += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i == 0 { 0 } else { 0x80 };
        out.push(groups[i] | continuation);
    }
}

/// Number of bytes `encode_id` produces for `id`.
pub fn id_len(id: u64) -> usize {
    let bits = 64 - id.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Read a big-endian base-128 id, returning the value and bytes consumed.
pub fn decode_id(data: &[u8]) -> Result<(u64, usize)> {
    let mut id: u64 = 0;
    for (i, &b) in data.iter().enumerate() {
        if id > (u64::MAX >> 7) {
            return Err(ProtocolError::MalformedMessage(
                constants::ERR_ID_OVERFLOW.to_string(),
            ));
        }
        id = (id << 7) | (b & 0x7F) as u64;
        if b & 0x80 == 0 {
            return Ok((id, i + 1));
        }
    }
    Err(ProtocolError::MalformedMessage(
        constants::ERR_TRUNCATED_ID.to_string(),
    ))
}

fn truncated_route() -> ProtocolError {
    ProtocolError::MalformedMessage(constants::ERR_TRUNCATED_ROUTE.to_string())
}
