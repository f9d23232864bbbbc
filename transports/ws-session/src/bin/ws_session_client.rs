//! WebSocket session client
//!
//! Connects to a signaling server, logs every inbound message and forwards
//! each stdin line as a text message.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ws_session_client -- --url ws://127.0.0.1:8088/test
//!
//! # Load settings from a file, override the retry bound
//! cargo run --bin ws_session_client -- \
//!   --config ./session.toml \
//!   --max-reconnect-attempts 10
//! ```

use anyhow::Context;
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use ws_session::{Error, MessageKind, Session, SessionConfig, SessionListener, SessionState};

/// WebSocket session client
///
/// Keeps one connection to the server open, reconnecting on drops.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server URL (ws:// or wss://)
    #[arg(long, env = "WS_SESSION_URL")]
    url: Option<String>,

    /// Session name used in logs
    #[arg(long, env = "WS_SESSION_NAME")]
    name: Option<String>,

    /// Reconnect attempts before giving up
    #[arg(long, env = "WS_SESSION_MAX_RECONNECT_ATTEMPTS")]
    max_reconnect_attempts: Option<u32>,

    /// Delay between reconnect attempts in milliseconds
    #[arg(long, env = "WS_SESSION_RECONNECT_DELAY_MS")]
    reconnect_delay_ms: Option<u64>,

    /// Session configuration file (.toml or .json)
    #[arg(long, env = "WS_SESSION_CONFIG")]
    config: Option<PathBuf>,
}

struct LogListener;

impl SessionListener for LogListener {
    fn on_message(&self, connection_id: u64, kind: MessageKind, payload: &[u8]) {
        match kind {
            MessageKind::Text => info!(
                connection_id,
                "Received text: {}",
                String::from_utf8_lossy(payload)
            ),
            MessageKind::Binary => info!(connection_id, bytes = payload.len(), "Received binary message"),
        }
    }

    fn on_connected(&self, connection_id: u64) {
        info!(connection_id, "Connected, type a line to send it");
    }

    fn on_closed(&self, connection_id: u64, code: Option<u16>, reason: &str) {
        info!(connection_id, ?code, reason, "Connection closed");
    }

    fn on_error(&self, connection_id: u64, error: &Error) {
        warn!(connection_id, error = %error, "Session error");
    }

    fn on_state_change(&self, old: SessionState, new: SessionState) {
        info!(from = %old, to = %new, "Session state changed");
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = build_config(&args)?;
    config.validate().context("invalid session configuration")?;

    let url = config.url.clone();
    if url.is_empty() {
        anyhow::bail!("no server URL given, pass --url or set it in the config file");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        if shutdown_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(1);
        }
    })
    .context("failed to install Ctrl+C handler")?;

    let session = Arc::new(Session::new(config));
    let listener: Arc<dyn SessionListener> = Arc::new(LogListener);
    if let Err(e) = session.start(&url, Arc::clone(&listener)) {
        if e.is_config_error() {
            return Err(e).with_context(|| format!("cannot start session for '{}'", url));
        }
        return Err(e.into());
    }

    // Blocks on stdin; the process exits without joining it
    let stdin_session = Arc::clone(&session);
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if !line.is_empty() => stdin_session.send_text(line),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
        })
        .context("failed to spawn stdin reader")?;

    info!("Press Ctrl+C to stop");
    while !shutdown.load(Ordering::SeqCst) {
        if session.has_given_up() {
            warn!("Session gave up reconnecting, exiting");
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    session.stop();
    info!("Client stopped");
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SessionConfig::default(),
    };

    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(max_attempts) = args.max_reconnect_attempts {
        config.reconnect.max_attempts = max_attempts;
    }
    if let Some(delay_ms) = args.reconnect_delay_ms {
        config.reconnect.delay_ms = delay_ms;
    }

    Ok(config)
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
