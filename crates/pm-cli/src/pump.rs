//! Copy bytes between a multiplexed stream and a local socket

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use pm_core::{Stream, StreamError};

const BUFFER_SIZE: usize = 16 * 1024;

/// Why a pump stopped early
#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    /// The multiplexed stream failed
    #[error("stream: {0}")]
    Stream(#[from] StreamError),

    /// The local socket failed
    #[error("socket: {0}")]
    Io(#[from] std::io::Error),
}

/// Bytes moved in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Socket to stream
    pub sent: u64,
    /// Stream to socket
    pub received: u64,
}

/// Copy in both directions until both sides have finished.
///
/// Socket EOF closes the stream's write side; stream EOF shuts down the
/// socket's write side. A failure in either direction resets the stream.
pub async fn pump<S, T>(stream: &S, socket: T) -> Result<PumpStats, PumpError>
where
    S: Stream + ?Sized,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (mut socket_rx, mut socket_tx) = tokio::io::split(socket);

    let result = tokio::try_join!(
        socket_to_stream(&mut socket_rx, stream),
        stream_to_socket(stream, &mut socket_tx),
    );

    match result {
        Ok((sent, received)) => {
            tracing::debug!(
                "{} finished: {} bytes sent, {} bytes received",
                stream.id(),
                sent,
                received
            );
            Ok(PumpStats { sent, received })
        }
        Err(e) => {
            tracing::debug!("{} aborted: {}", stream.id(), e);
            let _ = stream.reset().await;
            Err(e)
        }
    }
}

async fn socket_to_stream<R, S>(socket: &mut R, stream: &S) -> Result<u64, PumpError>
where
    R: AsyncRead + Unpin,
    S: Stream + ?Sized,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            stream.close().await?;
            return Ok(total);
        }
        stream.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

async fn stream_to_socket<S, W>(stream: &S, socket: &mut W) -> Result<u64, PumpError>
where
    S: Stream + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            socket.shutdown().await?;
            return Ok(total);
        }
        socket.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}
