//! Tokio codec for multiplexed frames

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::frame_type::FrameType;
use crate::headers::Headers;
use crate::stream_id::StreamId;

/// A complete frame with header fields and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Stream this frame belongs to
    pub stream_id: StreamId,
    /// Frame type
    pub frame_type: FrameType,
    /// Raw payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(stream_id: StreamId, frame_type: FrameType, payload: Bytes) -> Self {
        Self {
            stream_id,
            frame_type,
            payload,
        }
    }

    /// Data frame
    pub fn data(stream_id: StreamId, payload: impl Into<Bytes>) -> Self {
        Self::new(stream_id, FrameType::Data, payload.into())
    }

    /// Headers frame opening a stream
    pub fn headers(stream_id: StreamId, headers: &Headers) -> Result<Self, ProtocolError> {
        let payload = bincode::serialize(headers)?;
        Ok(Self::new(stream_id, FrameType::Headers, Bytes::from(payload)))
    }

    /// Reset frame
    pub fn reset(stream_id: StreamId) -> Self {
        Self::new(stream_id, FrameType::Reset, Bytes::new())
    }

    /// Close frame
    pub fn close(stream_id: StreamId) -> Self {
        Self::new(stream_id, FrameType::Close, Bytes::new())
    }

    /// Decode the payload of a Headers frame
    pub fn decode_headers(&self) -> Result<Headers, ProtocolError> {
        Ok(bincode::deserialize(&self.payload)?)
    }

    /// Encode this frame into a standalone buffer
    pub fn encode_to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        FrameCodec::new().encode(self.clone(), &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Codec for encoding/decoding protocol frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_length as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if header.frame_type.is_control() && payload_len != 0 {
            return Err(ProtocolError::UnexpectedPayload {
                stream_id: header.stream_id,
                frame_type: header.frame_type,
                len: payload_len,
            });
        }

        if src.len() < payload_len {
            // Save header and wait for more data
            src.reserve(payload_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();

        tracing::trace!(
            "Decoded {:?} frame for {} ({} bytes)",
            header.frame_type,
            header.stream_id,
            payload_len
        );

        Ok(Some(Frame {
            stream_id: header.stream_id,
            frame_type: header.frame_type,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload_len = frame.payload.len();

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if frame.frame_type.is_control() && payload_len != 0 {
            return Err(ProtocolError::UnexpectedPayload {
                stream_id: frame.stream_id,
                frame_type: frame.frame_type,
                len: payload_len,
            });
        }

        let header = FrameHeader::new(frame.stream_id, frame.frame_type, payload_len as u32);
        dst.reserve(HEADER_SIZE + payload_len);
        header.encode(dst);
        dst.extend_from_slice(&frame.payload);

        Ok(())
    }
}
