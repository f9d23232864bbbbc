//! WebSocket signaling server binary
//!
//! Accepts one peer at a time on a single path and logs what it receives.
//!
//! # Usage
//!
//! ```bash
//! # Listen on 0.0.0.0:8088/test
//! cargo run --bin ws_signaling_server
//!
//! cargo run --bin ws_signaling_server -- --port 9000 --path /signaling
//! ```

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use ws_session::{MessageKind, ServerConfig, ServerHandler, SignalingServer};

/// WebSocket signaling server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "WS_SIGNALING_BIND_ADDRESS")]
    bind_address: String,

    /// TCP port
    #[arg(short, long, default_value_t = 8088, env = "WS_SIGNALING_PORT")]
    port: u16,

    /// Request path accepted for WebSocket upgrades
    #[arg(long, default_value = "/test", env = "WS_SIGNALING_PATH")]
    path: String,
}

struct LogHandler;

impl ServerHandler for LogHandler {
    fn on_peer_connected(&self, peer_id: u64, addr: SocketAddr) {
        info!(peer_id, %addr, "Peer connected");
    }

    fn on_message(&self, peer_id: u64, kind: MessageKind, payload: &[u8]) {
        match kind {
            MessageKind::Text => info!(peer_id, text = %String::from_utf8_lossy(payload), "Received message"),
            MessageKind::Binary => info!(peer_id, bytes = payload.len(), "Received binary message, ignored"),
        }
    }

    fn on_peer_closed(&self, peer_id: u64) {
        info!(peer_id, "Peer closed");
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = ServerConfig {
        bind_address: args.bind_address,
        port: args.port,
        path: args.path,
        ..Default::default()
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        if shutdown_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(1);
        }
    })
    .context("failed to install Ctrl+C handler")?;

    let server = SignalingServer::bind(config, Arc::new(LogHandler))
        .context("failed to start signaling server")?;
    info!(url = %server.url(), "Signaling server ready, press Ctrl+C to stop");

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    server.shutdown();
    info!("Server stopped");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
