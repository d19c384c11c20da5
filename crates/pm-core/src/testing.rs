//! Scripted `Stream` implementation for tests
//!
//! `ScriptedStream` plays back a fixed sequence of read results and records
//! everything written to it, so code written against the `Stream` trait can
//! be tested without a transport.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};

use crate::error::StreamError;
use crate::traits::{Stream, StreamState};
use pm_protocol::{Headers, StreamId};

/// One scripted outcome for a `read` call
#[derive(Debug, Clone)]
pub enum ReadStep {
    /// Deliver these bytes (possibly across several reads)
    Data(Bytes),
    /// Fail the read with this error
    Error(StreamError),
}

#[derive(Debug)]
struct Script {
    reads: VecDeque<ReadStep>,
    written: BytesMut,
    write_error: Option<StreamError>,
    state: StreamState,
    close_calls: usize,
    reset_calls: usize,
}

/// A `Stream` whose reads are scripted up front
#[derive(Debug)]
pub struct ScriptedStream {
    id: StreamId,
    headers: Headers,
    script: Mutex<Script>,
}

impl ScriptedStream {
    /// Create a stream with no scripted reads; reads return EOF
    pub fn new(id: u32, headers: Headers) -> Self {
        Self {
            id: StreamId::new(id),
            headers,
            script: Mutex::new(Script {
                reads: VecDeque::new(),
                written: BytesMut::new(),
                write_error: None,
                state: StreamState::Open,
                close_calls: 0,
                reset_calls: 0,
            }),
        }
    }

    /// Queue bytes for a later read
    pub fn with_read(self, data: impl Into<Bytes>) -> Self {
        self.lock().reads.push_back(ReadStep::Data(data.into()));
        self
    }

    /// Queue a read failure
    pub fn with_read_error(self, err: StreamError) -> Self {
        self.lock().reads.push_back(ReadStep::Error(err));
        self
    }

    /// Make every write fail with `err`
    pub fn with_write_error(self, err: StreamError) -> Self {
        self.lock().write_error = Some(err);
        self
    }

    /// Everything written so far
    pub fn written(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock().written)
    }

    /// Current lifecycle state
    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    /// Number of `close` calls
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    /// Number of `reset` calls
    pub fn reset_calls(&self) -> usize {
        self.lock().reset_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // Poisoning only happens if a test already panicked
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Stream for ScriptedStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut script = self.lock();
        if script.state == StreamState::Reset {
            return Err(StreamError::Reset);
        }

        match script.reads.pop_front() {
            None => Ok(0),
            Some(ReadStep::Error(err)) => Err(err),
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                data.advance(n);
                if !data.is_empty() {
                    script.reads.push_front(ReadStep::Data(data));
                }
                Ok(n)
            }
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, StreamError> {
        let mut script = self.lock();
        if let Some(err) = script.write_error {
            return Err(err);
        }
        match script.state {
            StreamState::Reset => Err(StreamError::Reset),
            state if !state.can_write() => Err(StreamError::Closed),
            _ => {
                script.written.extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }

    async fn close(&self) -> Result<(), StreamError> {
        let mut script = self.lock();
        script.close_calls += 1;
        if script.state == StreamState::Reset {
            return Err(StreamError::Reset);
        }
        script.state = script.state.on_local_close();
        Ok(())
    }

    async fn reset(&self) -> Result<(), StreamError> {
        let mut script = self.lock();
        script.reset_calls += 1;
        script.state = script.state.on_reset();
        script.reads.clear();
        Ok(())
    }
}
