//! Connection multiplexer
//!
//! A `Multiplexer` owns one duplex transport and runs two background tasks
//! for its lifetime:
//!
//! - the **reader**, which decodes frames and routes them to streams by ID
//! - the **writer**, the only task that writes to the transport, draining a
//!   bounded queue of whole frames
//!
//! Any transport failure, transport EOF, or protocol violation resets every
//! live stream and stops both tasks.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use pm_core::config::MuxConfig;
use pm_core::{MuxError, Role, Stream};
use pm_protocol::{Frame, FrameCodec, FrameType, Headers, ProtocolError};

use crate::stream::MuxStream;
use crate::table::StreamTable;

/// State shared by the multiplexer handles, its tasks, and every stream
pub(crate) struct Connection {
    config: MuxConfig,
    table: StreamTable,
    outbound: mpsc::Sender<Frame>,
    /// Cancelled once the connection has terminated
    closed: CancellationToken,
}

impl Connection {
    pub(crate) fn table(&self) -> &StreamTable {
        &self.table
    }

    pub(crate) fn outbound(&self) -> &mpsc::Sender<Frame> {
        &self.outbound
    }

    pub(crate) fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// Tear the connection down, resetting every live stream
    fn terminate(&self, reason: &str) {
        if !self.closed.is_cancelled() {
            tracing::info!("Connection terminating: {}", reason);
        }
        self.closed.cancel();
        let reset = self.table.reset_all();
        if reset > 0 {
            tracing::debug!("Reset {} live streams", reset);
        }
    }

    /// Route one inbound frame. Never waits on the outbound queue.
    fn dispatch(
        self: &Arc<Self>,
        frame: Frame,
        incoming: &mpsc::Sender<MuxStream>,
    ) -> Result<(), MuxError> {
        let id = frame.stream_id;

        match frame.frame_type {
            FrameType::Data => match self.table.lookup(id) {
                Some(shared) => {
                    let len = frame.payload.len();
                    if !shared.push_data(frame.payload) {
                        tracing::debug!(
                            "Dropping {} bytes for {} in state {:?}",
                            len,
                            id,
                            shared.state()
                        );
                    }
                }
                None => {
                    tracing::debug!(
                        "Dropping {} bytes for unknown {}",
                        frame.payload.len(),
                        id
                    );
                }
            },

            FrameType::Headers => {
                if self.table.lookup(id).is_some() {
                    return Err(ProtocolError::HeadersOnOpenStream(id).into());
                }
                let headers = frame.decode_headers()?;
                let shared = self.table.accept(id)?;
                tracing::debug!("Peer opened {} with headers {}", id, headers);

                let stream = MuxStream::new(Arc::clone(self), shared, headers);
                // A refused stream is dropped, which queues its Reset without blocking
                match incoming.try_send(stream) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!("Accept backlog full, refusing {}", id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!("No acceptor, refusing {}", id);
                    }
                }
            }

            FrameType::Reset => match self.table.remove(id) {
                Some(shared) => {
                    tracing::debug!("Peer reset {}", id);
                    shared.reset();
                }
                None => tracing::debug!("Ignoring reset for unknown {}", id),
            },

            FrameType::Close => match self.table.lookup(id) {
                Some(shared) => {
                    let state = shared.remote_close();
                    tracing::debug!("Peer closed {} (now {:?})", id, state);
                    self.table.remove_if_finished(&shared);
                }
                None => tracing::debug!("Ignoring close for unknown {}", id),
            },
        }

        Ok(())
    }
}

/// Handle to a multiplexed connection.
///
/// Cheap to clone; every clone opens streams on the same connection. The
/// background tasks run until the transport fails or closes, or until
/// `shutdown` is called.
#[derive(Clone)]
pub struct Multiplexer {
    conn: Arc<Connection>,
}

/// Streams opened by the peer, in the order their Headers frames arrived
pub struct IncomingStreams {
    rx: mpsc::Receiver<MuxStream>,
}

impl IncomingStreams {
    /// Wait for the peer to open a stream.
    ///
    /// Returns `None` once the connection has terminated and every pending
    /// stream has been taken.
    pub async fn accept(&mut self) -> Option<MuxStream> {
        self.rx.recv().await
    }
}

impl Multiplexer {
    /// Start multiplexing over `transport`.
    ///
    /// Must be called from within a tokio runtime; the reader and writer
    /// tasks are spawned onto it.
    pub fn new<T>(transport: T, role: Role, config: MuxConfig) -> (Self, IncomingStreams)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(transport);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue.max(1));
        let (incoming_tx, incoming_rx) = mpsc::channel(config.accept_backlog.max(1));

        let conn = Arc::new(Connection {
            config,
            table: StreamTable::new(role),
            outbound: outbound_tx,
            closed: CancellationToken::new(),
        });

        tracing::info!("Starting {} multiplexer", role);

        tokio::spawn(run_reader(
            Arc::clone(&conn),
            FramedRead::new(read_half, FrameCodec::new()),
            incoming_tx,
        ));
        tokio::spawn(run_writer(
            Arc::clone(&conn),
            FramedWrite::new(write_half, FrameCodec::new()),
            outbound_rx,
        ));

        (Self { conn }, IncomingStreams { rx: incoming_rx })
    }

    /// Open a new stream carrying `headers`
    pub async fn open_stream(&self, headers: Headers) -> Result<MuxStream, MuxError> {
        if self.conn.closed.is_cancelled() {
            return Err(MuxError::ConnectionClosed);
        }

        let shared = self.conn.table.create()?;
        let id = shared.id();
        let frame = match Frame::headers(id, &headers) {
            Ok(frame) => frame,
            Err(e) => {
                self.conn.table.remove(id);
                return Err(e.into());
            }
        };
        let stream = MuxStream::new(Arc::clone(&self.conn), shared, headers);

        // Termination cancels before it empties the table, so this catches
        // a stream registered after the table was emptied
        if self.conn.closed.is_cancelled() {
            return Err(MuxError::ConnectionClosed);
        }

        if self.conn.outbound.send(frame).await.is_err() {
            return Err(MuxError::ConnectionClosed);
        }

        tracing::debug!("Opened {} with headers {}", id, stream.headers());
        Ok(stream)
    }

    /// Terminate the connection, resetting every live stream.
    ///
    /// Frames already queued are still written before the transport is shut down.
    pub fn shutdown(&self) {
        self.conn.terminate("shutdown requested");
    }

    /// Wait until the connection has terminated
    pub async fn closed(&self) {
        self.conn.closed.cancelled().await
    }

    /// Whether the connection has terminated
    pub fn is_closed(&self) -> bool {
        self.conn.closed.is_cancelled()
    }

    /// Number of streams currently registered
    pub fn stream_count(&self) -> usize {
        self.conn.table.len()
    }

    /// Which side of the transport this is
    pub fn role(&self) -> Role {
        self.conn.table.role()
    }
}

/// Read frames until the transport ends, routing each to its stream
async fn run_reader<T>(
    conn: Arc<Connection>,
    mut frames: FramedRead<ReadHalf<T>, FrameCodec>,
    incoming: mpsc::Sender<MuxStream>,
) where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let reason = 'frames: loop {
        let next = tokio::select! {
            _ = conn.closed.cancelled() => break 'frames "connection closed".to_string(),
            next = frames.next() => next,
        };

        match next {
            Some(Ok(frame)) => {
                if let Err(e) = conn.dispatch(frame, &incoming) {
                    tracing::error!("Fatal frame from peer: {}", e);
                    break 'frames e.to_string();
                }
            }
            Some(Err(ProtocolError::Io(e))) => {
                tracing::warn!("Transport read failed: {}", e);
                break 'frames format!("read error: {}", e);
            }
            Some(Err(e)) => {
                tracing::error!("Protocol error: {}", e);
                break 'frames e.to_string();
            }
            None => break 'frames "transport closed by peer".to_string(),
        }
    };

    conn.terminate(&reason);
}

/// Write queued frames one at a time; the only writer of the transport
async fn run_writer<T>(
    conn: Arc<Connection>,
    mut sink: FramedWrite<WriteHalf<T>, FrameCodec>,
    mut outbound: mpsc::Receiver<Frame>,
) where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = conn.closed.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = sink.send(frame).await {
            tracing::warn!("Transport write failed: {}", e);
            conn.terminate(&format!("write error: {}", e));
            return;
        }
    }

    // Flush what callers queued before termination, then shut the write side
    outbound.close();
    while let Ok(frame) = outbound.try_recv() {
        if sink.feed(frame).await.is_err() {
            break;
        }
    }
    if let Err(e) = sink.close().await {
        tracing::debug!("Transport shutdown failed: {}", e);
    }
}
