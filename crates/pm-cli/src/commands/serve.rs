//! `portmux serve`: accept transports and connect their streams to local ports

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use pm_core::config::MuxConfig;
use pm_core::{Role, Stream};
use pm_mux::{Multiplexer, MuxStream};
use pm_protocol::STREAM_TYPE_HEADER;

use crate::options::DATA_STREAM_TYPE;
use crate::output::print_success;
use crate::pump::pump;

/// Run the server until `shutdown` is cancelled
pub async fn serve_command(
    listen: &str,
    target_host: &str,
    config: MuxConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;
    let local_addr = listener.local_addr()?;

    print_success(&format!(
        "Listening on {}, forwarding streams to {}",
        local_addr, target_host
    ));

    loop {
        let (socket, peer) = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    continue;
                }
            },
        };

        tracing::info!("Transport connected from {}", peer);
        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let target_host = target_host.to_string();
        let config = config.clone();
        let shutdown = shutdown.child_token();
        tokio::spawn(async move {
            serve_transport(socket, target_host, config, shutdown).await;
            tracing::info!("Transport from {} finished", peer);
        });
    }
}

/// Serve one transport: every stream the peer opens is connected to
/// `target_host` on the port named in its headers.
pub async fn serve_transport<T>(
    transport: T,
    target_host: String,
    config: MuxConfig,
    shutdown: CancellationToken,
) where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mux, mut incoming) = Multiplexer::new(transport, Role::Server, config);

    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => {
                mux.shutdown();
                return;
            }
            stream = incoming.accept() => match stream {
                Some(stream) => stream,
                None => return,
            },
        };

        tokio::spawn(handle_stream(stream, target_host.clone()));
    }
}

async fn handle_stream(stream: MuxStream, target_host: String) {
    let id = stream.id();

    if let Some(kind) = stream.headers().get(STREAM_TYPE_HEADER) {
        if kind != DATA_STREAM_TYPE {
            tracing::warn!("Refusing {} with unsupported stream type '{}'", id, kind);
            let _ = stream.reset().await;
            return;
        }
    }

    let Some(port) = stream.headers().port() else {
        tracing::warn!("Refusing {} without a valid port header", id);
        let _ = stream.reset().await;
        return;
    };

    let socket = match TcpStream::connect((target_host.as_str(), port)).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::warn!("{}: connect to {}:{} failed: {}", id, target_host, port, e);
            let _ = stream.reset().await;
            return;
        }
    };

    tracing::debug!("{} connected to {}:{}", id, target_host, port);
    if let Err(e) = pump(&stream, socket).await {
        tracing::debug!("{} to {}:{} ended: {}", id, target_host, port, e);
    }
}
