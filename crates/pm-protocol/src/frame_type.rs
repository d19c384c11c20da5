//! Frame types for the portmux protocol
//!
//! Every frame on the wire carries one of four types:
//!
//! 1. `Headers` opens a stream and carries its immutable metadata
//! 2. `Data` carries payload bytes for an open stream
//! 3. `Close` ends the sender's direction of a stream gracefully
//! 4. `Reset` aborts a stream in both directions, discarding unread data
//!
//! A typical stream sees one `Headers` frame from the opener, `Data` frames
//! in both directions, and one `Close` from each side.

/// Frame type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Stream payload bytes
    Data = 0x01,
    /// Stream open with metadata
    Headers = 0x02,
    /// Abrupt abort
    Reset = 0x03,
    /// Graceful half-close
    Close = 0x04,
}

impl FrameType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Data),
            0x02 => Some(Self::Headers),
            0x03 => Some(Self::Reset),
            0x04 => Some(Self::Close),
            _ => None,
        }
    }

    /// Control frames never carry a payload
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Reset | Self::Close)
    }
}
