//! Stream traits

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StreamError;
use pm_protocol::{Headers, StreamId};

/// Stream lifecycle state
///
/// ```text
/// Open --local close--> LocalClosed --remote close--> Closed
/// Open --remote close--> RemoteClosed --local close--> Closed
/// any non-terminal --reset--> Reset
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Both directions open
    Open,
    /// We sent Close; the peer may still send data
    LocalClosed,
    /// The peer sent Close; we may still write
    RemoteClosed,
    /// Both directions closed gracefully
    Closed,
    /// Aborted
    Reset,
}

impl StreamState {
    /// State after a local close. Terminal states are unchanged.
    pub fn on_local_close(self) -> Self {
        match self {
            Self::Open => Self::LocalClosed,
            Self::RemoteClosed => Self::Closed,
            other => other,
        }
    }

    /// State after the peer's Close frame. Terminal states are unchanged.
    pub fn on_remote_close(self) -> Self {
        match self {
            Self::Open => Self::RemoteClosed,
            Self::LocalClosed => Self::Closed,
            other => other,
        }
    }

    /// State after a reset from either side. Closed stays Closed.
    pub fn on_reset(self) -> Self {
        match self {
            Self::Closed => Self::Closed,
            _ => Self::Reset,
        }
    }

    /// Closed or Reset
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Reset)
    }

    /// Whether the local side may still send data
    pub fn can_write(&self) -> bool {
        matches!(self, Self::Open | Self::RemoteClosed)
    }

    /// Whether the peer may still send data
    pub fn can_receive(&self) -> bool {
        matches!(self, Self::Open | Self::LocalClosed)
    }
}

/// One logical, bidirectional byte channel.
///
/// Implemented by the multiplexed stream and by test doubles. Methods take
/// `&self` so a handle can be shared between a reading and a writing task.
#[async_trait]
pub trait Stream: Send + Sync {
    /// Stable identifier
    fn id(&self) -> StreamId;

    /// Metadata captured when the stream was opened
    fn headers(&self) -> &Headers;

    /// Read buffered bytes into `buf`.
    ///
    /// Suspends until data is available or the stream ends. `Ok(0)` means
    /// the peer closed its direction and everything has been read.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Write `buf` to the peer, returning the number of bytes accepted
    async fn write(&self, buf: &[u8]) -> Result<usize, StreamError>;

    /// Close the local direction. Idempotent.
    async fn close(&self) -> Result<(), StreamError>;

    /// Abort the stream in both directions. Idempotent.
    async fn reset(&self) -> Result<(), StreamError>;

    /// `read` with a deadline. On expiry the stream is left as it was.
    async fn read_timeout(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, StreamError> {
        tokio::time::timeout(timeout, self.read(buf))
            .await
            .map_err(|_| StreamError::Timeout)?
    }

    /// `write` with a deadline. On expiry the stream is left as it was.
    async fn write_timeout(&self, buf: &[u8], timeout: Duration) -> Result<usize, StreamError> {
        tokio::time::timeout(timeout, self.write(buf))
            .await
            .map_err(|_| StreamError::Timeout)?
    }

    /// Write the whole buffer
    async fn write_all(&self, mut buf: &[u8]) -> Result<(), StreamError> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            if n == 0 {
                return Err(StreamError::Closed);
            }
            buf = &buf[n..];
        }
        Ok(())
    }
}
