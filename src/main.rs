use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tokio::net::{TcpListener, TcpSocket};
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod event;
mod flooder;

use crate::config::{Args, Config};
use crate::event::EventFactory;
use crate::flooder::Flooder;

const CONFIG_FILE: &str = "presence_flood";
// Pause after a failed accept so a persistent error (e.g. out of file
// descriptors) doesn't spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(CONFIG_FILE)
        .context("Error loading config")?
        .with_args(&args)
        .validate()
        .context("Invalid config")?;
    init_tracing(&config.log_level);

    let addr = config.listen_addr()?;
    let listener =
        bind(addr, config.backlog).with_context(|| format!("Error binding to {}", addr))?;
    tracing::info!(
        "Presence flood server on port {}, rate={}/s, duration={}s",
        config.port,
        config.rate,
        config.duration_secs
    );

    let flooder = Flooder::new(
        config.rate,
        config.duration(),
        EventFactory::new(config.consistent_tenants),
    );
    serve(listener, flooder).await
}

// RUST_LOG wins over the configured level when it is set.
fn init_tracing(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Listening socket with SO_REUSEADDR so a restarted server can rebind
/// right away.
fn bind(addr: SocketAddr, backlog: u32) -> anyhow::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(backlog)?)
}

/// Accepts clients forever. Every client gets its own task and nothing is
/// shared between them, so one failing handler never affects the others.
async fn serve(listener: TcpListener, flooder: Flooder) -> anyhow::Result<()> {
    tracing::debug!("Accepting connections at {}", listener.local_addr()?);
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let flooder = flooder.clone();
                tokio::spawn(async move {
                    if let Err(err) = flooder.handle(stream, peer).await {
                        tracing::error!("Client handler failed [peer={}]: {:#}", peer, err);
                    }
                });
            }
            Err(err) => {
                tracing::warn!("Error accepting connection: {}", err);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
