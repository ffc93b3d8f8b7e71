mod config;
mod connection;
mod handlers;
mod state;

use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use whitebox_netconf::{CommandBackend, MemoryBackend, TunnelBackend, TunnelController};

use config::Args;
use state::DaemonState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI arguments
    let args = Args::parse();
    args.validate().map_err(|e| anyhow!(e))?;

    if args.listen.ip().is_loopback() {
        info!("Serving loopback clients only");
    } else {
        warn!("Listening on {} without authentication (--allow-remote)", args.listen);
    }

    let backend: Arc<dyn TunnelBackend> = if args.dry_run {
        warn!("Dry run: kernel changes are simulated in memory");
        Arc::new(MemoryBackend::new())
    } else {
        Arc::new(CommandBackend::new(args.command_timeout()))
    };

    // Create shared state
    let controller = TunnelController::new(backend, args.netconf_config());
    info!("Managing device {} (mtu {})", args.device, args.mtu);
    let state = Arc::new(DaemonState::new(controller));

    // Bind TCP listener
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!("Listening on {}", args.listen);

    // Accept loop
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down, kernel state is left as is");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        connection::handle_client(stream, peer.to_string(), state).await;
                    });
                }
                Err(e) => {
                    error!("Accept error: {e}");
                }
            }
        }
    }

    Ok(())
}
