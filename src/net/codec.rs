//! Frame codec
//!
//! Every packet on the wire, client or coordinator, is framed as:
//!
//! ```text
//! [Header 0x5E (1)] [Payload length u32 LE (4)] [Payload (N)]
//! ```
//!
//! The codec only deals with framing; payload layout is handled by
//! [`crate::protocol::packets`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtocolError, RhisisError};
use crate::net::buffer::MAX_PACKET_SIZE;

/// Frame header byte
pub const FRAME_HEADER: u8 = 0x5E;

/// Size of header byte plus length field
pub const FRAME_PREFIX_SIZE: usize = 5;

/// Length-prefixed frame codec
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload: usize,
}

impl FrameCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = RhisisError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_PREFIX_SIZE {
            return Ok(None);
        }

        if src[0] != FRAME_HEADER {
            return Err(ProtocolError::InvalidHeader(src[0]).into());
        }

        let length = u32::from_le_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if length > self.max_payload {
            return Err(ProtocolError::PacketTooLarge {
                size: length,
                max: self.max_payload,
            }
            .into());
        }

        if src.len() < FRAME_PREFIX_SIZE + length {
            src.reserve(FRAME_PREFIX_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(FRAME_PREFIX_SIZE);
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = RhisisError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if payload.len() > self.max_payload {
            return Err(ProtocolError::PacketTooLarge {
                size: payload.len(),
                max: self.max_payload,
            }
            .into());
        }

        dst.reserve(FRAME_PREFIX_SIZE + payload.len());
        dst.put_u8(FRAME_HEADER);
        dst.put_u32_le(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let mut codec = FrameCodec::default();
        let mut out = BytesMut::new();
        codec
            .encode(Bytes::from_static(&[1, 2, 3]), &mut out)
            .unwrap();

        assert_eq!(&out[..], &[0x5E, 3, 0, 0, 0, 1, 2, 3]);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0x5E, 4, 0, 0, 0, 9, 9][..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7);

        buf.extend_from_slice(&[9, 9]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], &[9, 9, 9, 9]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"ab"), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"cde"), &mut buf).unwrap();

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"ab");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"cde");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0x00, 0, 0, 0, 0][..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(RhisisError::Protocol(ProtocolError::InvalidHeader(0)))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&[0x5E, 9, 0, 0, 0][..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(RhisisError::Protocol(ProtocolError::PacketTooLarge { size: 9, max: 8 }))
        ));
    }
}
