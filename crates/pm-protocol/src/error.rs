//! Protocol error types

use thiserror::Error;

use crate::frame_type::FrameType;
use crate::stream_id::StreamId;

/// Errors that can occur while encoding or decoding frames.
///
/// All of these are fatal to the connection they occur on.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Unknown frame type byte
    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// A Reset or Close frame arrived with a payload
    #[error("{frame_type:?} frame on {stream_id} carries {len} unexpected payload bytes")]
    UnexpectedPayload {
        stream_id: StreamId,
        frame_type: FrameType,
        len: usize,
    },

    /// A Headers frame arrived for a stream that is already open
    #[error("Headers frame received for already open {0}")]
    HeadersOnOpenStream(StreamId),

    /// The peer opened a stream with an ID from this side's range
    #[error("Peer opened {0}, which is outside its ID range")]
    StreamIdOutOfRange(StreamId),

    /// The peer opened a stream with an ID it has used before
    #[error("Peer reused {0}")]
    StreamIdReused(StreamId),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
