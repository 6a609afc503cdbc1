//! Stream framing for byte-oriented transports.
//!
//! `PackageCodec` buffers partial reads until a full head and body are
//! available, then yields one [`Package`] at a time. Bytes are consumed strictly
//! in arrival order.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::package::{body_len, Package, PackageType, HEADER_SIZE, MAX_BODY_SIZE};
use crate::error::{ProtocolError, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct PackageCodec;

impl Decoder for PackageCodec {
    type Item = Package;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Validate the type as soon as the head arrives so a garbage stream is
        // dropped before its declared body is buffered.
        let kind = PackageType::try_from(src[0])?;
        let len = body_len(&src[..HEADER_SIZE]);
        let total = HEADER_SIZE + len;

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(len);
        Ok(Some(Package {
            kind,
            body: body.to_vec(),
        }))
    }
}

impl Encoder<Package> for PackageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Package, dst: &mut BytesMut) -> Result<()> {
        let len = item.body.len();
        if len > MAX_BODY_SIZE {
            return Err(ProtocolError::OversizedPackage(len));
        }
        dst.reserve(HEADER_SIZE + len);
        dst.put_u8(item.kind.as_u8());
        dst.put_uint(len as u64, 3);
        dst.extend_from_slice(&item.body);
        Ok(())
    }
}
