//! `portmux forward`: expose remote ports locally over one connection

use anyhow::{anyhow, bail, Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use pm_core::config::MuxConfig;
use pm_core::{Role, Stream};
use pm_mux::Multiplexer;
use pm_protocol::Headers;

use crate::options::{ForwardOptions, PortMapping};
use crate::output::{format_plan, print_info, print_success};
use crate::pump::pump;

/// One local listener and the headers its streams carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRoute {
    /// Port pair from the command line
    pub mapping: PortMapping,
    /// Headers sent when a local connection opens a stream
    pub headers: Headers,
}

/// What `forward` will do, resolved from the options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardPlan {
    /// Server to dial
    pub remote: String,
    /// Host the local listeners bind to
    pub bind_host: String,
    /// One route per forwarded port
    pub routes: Vec<ForwardRoute>,
}

impl ForwardPlan {
    /// Validate `options` and resolve the headers for every port
    pub fn new(
        remote: &str,
        bind_host: &str,
        ports: &[PortMapping],
        options: &ForwardOptions,
    ) -> Result<Self> {
        options.validate()?;
        if ports.is_empty() {
            bail!("at least one --port is required");
        }
        let modules = options
            .resolve_modules()
            .context("Failed to load modules")?;

        let routes = ports
            .iter()
            .map(|&mapping| ForwardRoute {
                mapping,
                headers: options.stream_headers(&modules, mapping.remote),
            })
            .collect();

        Ok(Self {
            remote: remote.to_string(),
            bind_host: bind_host.to_string(),
            routes,
        })
    }
}

/// Run the forwarder until the connection is lost or `shutdown` is cancelled
pub async fn forward_command(
    plan: ForwardPlan,
    options: &ForwardOptions,
    config: MuxConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    if options.dry_run {
        println!("{}", format_plan(&plan));
        return Ok(());
    }

    print_info(&format!("Connecting to {}...", plan.remote));
    let transport = tokio::time::timeout(options.timeout, TcpStream::connect(&plan.remote))
        .await
        .map_err(|_| {
            anyhow!(
                "Timed out connecting to {} after {}",
                plan.remote,
                humantime::format_duration(options.timeout)
            )
        })?
        .with_context(|| format!("Failed to connect to {}", plan.remote))?;
    transport.set_nodelay(true)?;

    // Forwarded connections only flow one way; streams the server opens are reset
    let (mux, incoming) = Multiplexer::new(transport, Role::Client, config);
    drop(incoming);

    for route in &plan.routes {
        let listener = TcpListener::bind((plan.bind_host.as_str(), route.mapping.local))
            .await
            .with_context(|| {
                format!(
                    "Failed to listen on {}:{}",
                    plan.bind_host, route.mapping.local
                )
            })?;
        print_success(&format!(
            "Forwarding {} -> {}:{}",
            listener.local_addr()?,
            plan.remote,
            route.mapping.remote
        ));
        tokio::spawn(forward_listener(
            listener,
            mux.clone(),
            route.headers.clone(),
            shutdown.child_token(),
        ));
    }

    tokio::select! {
        _ = shutdown.cancelled() => {
            tracing::info!("Forwarder shutting down");
            mux.shutdown();
            Ok(())
        }
        _ = mux.closed() => {
            bail!("Connection to {} lost", plan.remote)
        }
    }
}

/// Accept local connections and tunnel each one through its own stream
pub async fn forward_listener(
    listener: TcpListener,
    mux: Multiplexer,
    headers: Headers,
    shutdown: CancellationToken,
) {
    loop {
        let (socket, peer) = tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = mux.closed() => return,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    continue;
                }
            },
        };

        let mux = mux.clone();
        let headers = headers.clone();
        tokio::spawn(async move {
            let stream = match mux.open_stream(headers).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("Could not open stream for {}: {}", peer, e);
                    return;
                }
            };
            tracing::debug!("{} carries connection from {}", stream.id(), peer);
            if let Err(e) = pump(&stream, socket).await {
                tracing::debug!("{} ended: {}", stream.id(), e);
            }
        });
    }
}
