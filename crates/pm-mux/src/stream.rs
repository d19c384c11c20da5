//! Multiplexed stream handle and its per-stream shared state

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use pm_core::{Stream, StreamError, StreamState};
use pm_protocol::{Frame, Headers, StreamId};

use crate::mux::Connection;

/// State shared between a stream handle and the reader task
pub struct StreamShared {
    id: StreamId,
    inner: Mutex<Inbound>,
    /// Woken when data arrives or the peer closes
    readable: Notify,
    /// Cancelled when the stream is reset
    reset: CancellationToken,
}

struct Inbound {
    state: StreamState,
    chunks: VecDeque<Bytes>,
    buffered: usize,
}

impl StreamShared {
    pub(crate) fn new(id: StreamId) -> Self {
        Self {
            id,
            inner: Mutex::new(Inbound {
                state: StreamState::Open,
                chunks: VecDeque::new(),
                buffered: 0,
            }),
            readable: Notify::new(),
            reset: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inbound> {
        // The lock is never held across a panic point that leaves data inconsistent
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stream identifier
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    /// Bytes received but not yet read
    pub fn buffered(&self) -> usize {
        self.lock().buffered
    }

    /// Reset, or closed in both directions with everything read
    pub fn is_finished(&self) -> bool {
        let inbound = self.lock();
        match inbound.state {
            StreamState::Reset => true,
            StreamState::Closed => inbound.buffered == 0,
            _ => false,
        }
    }

    /// Queue data from the peer. Returns false if the stream no longer
    /// accepts inbound data.
    pub(crate) fn push_data(&self, data: Bytes) -> bool {
        {
            let mut inbound = self.lock();
            if !inbound.state.can_receive() {
                return false;
            }
            if data.is_empty() {
                return true;
            }
            inbound.buffered += data.len();
            inbound.chunks.push_back(data);
        }
        self.readable.notify_one();
        true
    }

    /// Apply the peer's Close frame
    pub(crate) fn remote_close(&self) -> StreamState {
        let state = {
            let mut inbound = self.lock();
            inbound.state = inbound.state.on_remote_close();
            inbound.state
        };
        self.readable.notify_one();
        state
    }

    /// Move to Reset, dropping unread data and waking blocked callers.
    ///
    /// Returns true if this call performed the transition.
    pub(crate) fn reset(&self) -> bool {
        {
            let mut inbound = self.lock();
            if inbound.state.is_terminal() {
                return false;
            }
            inbound.state = StreamState::Reset;
            inbound.chunks.clear();
            inbound.buffered = 0;
        }
        self.reset.cancel();
        self.readable.notify_one();
        true
    }

    /// Apply a local close. Returns the previous state.
    fn local_close(&self) -> StreamState {
        let mut inbound = self.lock();
        let previous = inbound.state;
        inbound.state = previous.on_local_close();
        previous
    }

    /// Copy buffered bytes into `buf`, or report why nothing can be read.
    /// `None` means the caller has to wait.
    fn try_read(&self, buf: &mut [u8]) -> Option<Result<usize, StreamError>> {
        let mut inbound = self.lock();
        if inbound.state == StreamState::Reset {
            return Some(Err(StreamError::Reset));
        }
        if buf.is_empty() {
            return Some(Ok(0));
        }

        if inbound.buffered > 0 {
            let mut copied = 0;
            while copied < buf.len() {
                let Some(chunk) = inbound.chunks.front_mut() else {
                    break;
                };
                let n = chunk.len().min(buf.len() - copied);
                buf[copied..copied + n].copy_from_slice(&chunk[..n]);
                chunk.advance(n);
                if chunk.is_empty() {
                    inbound.chunks.pop_front();
                }
                copied += n;
            }
            inbound.buffered -= copied;
            return Some(Ok(copied));
        }

        if !inbound.state.can_receive() {
            // Peer closed and everything has been delivered
            return Some(Ok(0));
        }
        None
    }
}

impl fmt::Debug for StreamShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inbound = self.lock();
        f.debug_struct("StreamShared")
            .field("id", &self.id)
            .field("state", &inbound.state)
            .field("buffered", &inbound.buffered)
            .finish()
    }
}

/// A logical stream multiplexed over a shared connection.
///
/// Dropping a handle whose write side is still open resets the stream.
pub struct MuxStream {
    id: StreamId,
    headers: Headers,
    shared: Arc<StreamShared>,
    conn: Arc<Connection>,
    /// Serializes this stream's Data and Close frames
    send_lock: tokio::sync::Mutex<()>,
}

impl MuxStream {
    pub(crate) fn new(conn: Arc<Connection>, shared: Arc<StreamShared>, headers: Headers) -> Self {
        Self {
            id: shared.id(),
            headers,
            shared,
            conn,
            send_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Bytes received from the peer but not yet read
    pub fn buffered(&self) -> usize {
        self.shared.buffered()
    }

    fn check_writable(&self) -> Result<(), StreamError> {
        match self.shared.state() {
            StreamState::Reset => Err(StreamError::Reset),
            state if !state.can_write() => Err(StreamError::Closed),
            _ => Ok(()),
        }
    }

    /// Queue a frame for the writer, giving up if the stream is reset meanwhile
    async fn send(&self, frame: Frame) -> Result<(), StreamError> {
        tokio::select! {
            biased;
            _ = self.shared.reset.cancelled() => Err(StreamError::Reset),
            sent = self.conn.outbound().send(frame) => sent.map_err(|_| StreamError::Reset),
        }
    }
}

#[async_trait]
impl Stream for MuxStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        loop {
            if let Some(result) = self.shared.try_read(buf) {
                if self.shared.is_finished() {
                    self.conn.table().remove_if_finished(&self.shared);
                }
                return result;
            }

            tokio::select! {
                _ = self.shared.readable.notified() => {}
                _ = self.shared.reset.cancelled() => {}
            }
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, StreamError> {
        self.check_writable()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let _guard = self.send_lock.lock().await;
        let mut written = 0;
        for chunk in buf.chunks(self.conn.config().max_frame_payload) {
            self.check_writable()?;
            self.send(Frame::data(self.id, Bytes::copy_from_slice(chunk)))
                .await?;
            written += chunk.len();
        }
        Ok(written)
    }

    async fn close(&self) -> Result<(), StreamError> {
        let _guard = self.send_lock.lock().await;

        match self.shared.local_close() {
            StreamState::Reset => return Err(StreamError::Reset),
            previous if !previous.can_write() => return Ok(()),
            _ => {}
        }

        tracing::debug!("Closing {}", self.id);
        self.send(Frame::close(self.id)).await?;
        self.conn.table().remove_if_finished(&self.shared);
        Ok(())
    }

    async fn reset(&self) -> Result<(), StreamError> {
        if self.shared.reset() {
            tracing::debug!("Resetting {}", self.id);
            self.conn.table().remove_stream(&self.shared);
            // The peer may already be gone; the local reset stands either way
            let _ = self.conn.outbound().send(Frame::reset(self.id)).await;
        }
        Ok(())
    }
}

impl Drop for MuxStream {
    fn drop(&mut self) {
        if self.shared.state().can_write() && self.shared.reset() {
            tracing::debug!("Dropped open {}, resetting", self.id);
            let _ = self.conn.outbound().try_send(Frame::reset(self.id));
        }
        self.conn.table().remove_stream(&self.shared);
    }
}

impl fmt::Debug for MuxStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxStream")
            .field("id", &self.id)
            .field("headers", &self.headers)
            .field("state", &self.shared.state())
            .finish()
    }
}
