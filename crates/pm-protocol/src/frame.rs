//! Frame header encoding/decoding
//!
//! The frame format uses an 8-byte header:
//! - stream_id: 4 bytes (u32, big-endian)
//! - frame_type: 1 byte (u8)
//! - payload_length: 3 bytes (u24, big-endian, max 16MB)
//!
//! The payload length is always explicit; nothing in the payload is ever
//! interpreted as a delimiter.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::frame_type::FrameType;
use crate::stream_id::StreamId;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 8;

/// Maximum payload size (16MB - 1, limited by 24-bit length field)
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Frame header containing routing and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Stream this frame belongs to
    pub stream_id: StreamId,
    /// Type of frame
    pub frame_type: FrameType,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(stream_id: StreamId, frame_type: FrameType, payload_length: u32) -> Self {
        Self {
            stream_id,
            frame_type,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u32(self.stream_id.as_u32());
        dst.put_u8(self.frame_type.as_u8());
        // 24-bit length
        dst.put_u8((self.payload_length >> 16) as u8);
        dst.put_u16(self.payload_length as u16);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer, leaving the
    /// buffer untouched. Returns Err if the frame type is unknown.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Validate the type before consuming anything
        let type_byte = src[4];
        let frame_type =
            FrameType::from_u8(type_byte).ok_or(ProtocolError::UnknownFrameType(type_byte))?;

        let stream_id = StreamId::new(src.get_u32());
        let _ = src.get_u8();
        let len_high = src.get_u8() as u32;
        let len_low = src.get_u16() as u32;
        let payload_length = (len_high << 16) | len_low;

        Ok(Some(Self {
            stream_id,
            frame_type,
            payload_length,
        }))
    }
}
