//! PeerTalk demo daemon: discovers peers on the local network, connects to
//! them, and echoes every message back to its sender.

mod config;
mod transport;

use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use peertalk_core::{Engine, Event};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("peertalk-posix {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load();
    let engine_cfg = cfg.to_engine();
    let backend =
        transport::PosixTransport::new(engine_cfg.discovery_port, engine_cfg.listen_port);
    let mut engine = Engine::new(&engine_cfg, backend).context("engine startup")?;
    engine.start_discovery().context("discovery startup")?;
    info!(name = %engine.config().local_name, "peertalk daemon running");

    loop {
        for event in engine.poll() {
            match event {
                Event::PeerDiscovered { peer } => {
                    let name = engine
                        .peer(peer)
                        .map(|p| p.name.clone())
                        .unwrap_or_default();
                    info!(%peer, name, "discovered");
                    if cfg.auto_connect {
                        if let Err(e) = engine.connect(peer) {
                            warn!(%peer, error = %e, "connect failed");
                        }
                    }
                }
                Event::PeerLost { peer } => info!(%peer, "lost"),
                Event::PeerConnected { peer } => info!(%peer, "connected"),
                Event::PeerDisconnected { peer, reason } => {
                    info!(%peer, %reason, "disconnected");
                }
                Event::Message { peer, data } => {
                    info!(%peer, len = data.len(), "message, echoing");
                    if let Err(e) = engine.send(peer, &data) {
                        warn!(%peer, error = %e, "echo failed");
                    }
                }
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
