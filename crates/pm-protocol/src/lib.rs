//! pm-protocol: Wire protocol for portmux stream multiplexing
//!
//! This crate defines the binary framing used to carry many logical
//! streams over one duplex transport.

pub mod codec;
pub mod error;
pub mod frame;
pub mod frame_type;
pub mod headers;
pub mod stream_id;

pub use codec::{Frame, FrameCodec};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use frame_type::FrameType;
pub use headers::{Headers, PORT_HEADER, STREAM_TYPE_HEADER};
pub use stream_id::StreamId;
