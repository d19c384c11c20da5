//! portmux CLI
//!
//! Single binary for both ends of a forwarded connection:
//! - `serve` accepts transports and connects their streams to local ports
//! - `forward` listens locally and tunnels connections to a server

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pm_core::config::{self, MuxConfig, PortmuxConfig};
use portmux::commands::{self, ForwardPlan};
use portmux::options::{parse_timeout, ForwardOptions, PortMapping};
use portmux::output::{print_error, print_warning};

#[derive(Parser)]
#[command(name = "portmux")]
#[command(author, version, about = "Forward TCP ports over a single multiplexed connection")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept multiplexed connections and connect their streams to local ports
    Serve {
        /// Address to listen on (overrides config)
        #[arg(short, long)]
        listen: Option<String>,
        /// Host that streams are connected to (overrides config)
        #[arg(long)]
        target_host: Option<String>,
    },

    /// Forward local ports to a portmux server
    Forward {
        /// Server to connect to (overrides config)
        #[arg(short, long)]
        remote: Option<String>,
        /// Port to forward, as LOCAL or LOCAL:REMOTE
        #[arg(short, long = "port", required = true)]
        ports: Vec<PortMapping>,
        /// Local address to listen on (overrides config)
        #[arg(long)]
        bind_host: Option<String>,
        /// Connect timeout, e.g. 500ms, 30s, 2m or bare seconds
        #[arg(short, long, value_parser = parse_timeout, allow_hyphen_values = true)]
        timeout: Option<Duration>,
        /// Module selectors passed to the server
        #[arg(short, long, value_delimiter = ',')]
        modules: Vec<String>,
        /// File listing additional modules, one per line
        #[arg(long)]
        modules_file: Option<PathBuf>,
        /// Source selector passed to the server
        #[arg(short, long)]
        source: Option<String>,
        /// Print what would be forwarded without connecting
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = load_config(cli.config.as_ref())?;
    config.mux.validate().context("Invalid [mux] configuration")?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let result = match cli.command {
        Commands::Serve {
            listen,
            target_host,
        } => {
            let listen = listen.unwrap_or(config.serve.listen);
            let target_host = target_host.unwrap_or(config.serve.target_host);
            commands::serve_command(&listen, &target_host, config.mux, shutdown).await
        }

        Commands::Forward {
            remote,
            ports,
            bind_host,
            timeout,
            modules,
            modules_file,
            source,
            dry_run,
        } => {
            let defaults = ForwardOptions::from(&config.forward);
            let options = ForwardOptions {
                timeout: timeout.unwrap_or(defaults.timeout),
                modules: if modules.is_empty() {
                    defaults.modules
                } else {
                    modules
                },
                modules_file,
                dry_run,
                source: source.or(defaults.source),
            };
            run_forward(
                remote.or(config.forward.remote),
                bind_host.unwrap_or(config.forward.bind_host),
                &ports,
                options,
                config.mux,
                shutdown,
            )
            .await
        }
    };

    if let Err(e) = result {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

async fn run_forward(
    remote: Option<String>,
    bind_host: String,
    ports: &[PortMapping],
    options: ForwardOptions,
    mux: MuxConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let remote = remote.context("no remote given; pass --remote or set forward.remote")?;
    let plan = ForwardPlan::new(&remote, &bind_host, ports, &options)?;
    commands::forward_command(plan, &options, mux, shutdown).await
}

/// Load the config file, falling back to defaults when none exists
fn load_config(path: Option<&PathBuf>) -> Result<PortmuxConfig> {
    if let Some(path) = path {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            print_warning(&format!("Ignoring config at {:?}: {}", default_path, e));
            PortmuxConfig::default()
        }))
    } else {
        tracing::debug!("Using default configuration");
        Ok(PortmuxConfig::default())
    }
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        shutdown.cancel();
    });
}
