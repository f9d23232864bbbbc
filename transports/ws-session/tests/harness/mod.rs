//! Session Test Harness
//!
//! Provides infrastructure for integration testing of sessions with:
//! - A recording `SessionListener`
//! - A scripted in-memory connector with controllable connections
//! - An embedded signaling server on a random port
//!
//! Basic usage pattern:
//!
//! 1. Build a `ScriptedConnector` (or start a `TestServer`)
//! 2. Start a `Session` with a `RecordingListener`
//! 3. Drive the peer side and wait for observable effects with `wait_until`
//! 4. Stop the session and assert on the recorded events

#![allow(dead_code)]

pub mod connector;
pub mod listener;
pub mod server;

use std::thread;
use std::time::{Duration, Instant};
use ws_session::{ReconnectPolicy, SessionConfig};

pub use connector::{mock_connection, MockConnection, MockPeer, ScriptedConnector, Step};
pub use listener::{ListenerEvent, RecordingListener};
pub use server::{RecordingHandler, TestServer};

/// Default time to wait for an asynchronous effect
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,ws_session=debug")
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or `WAIT_TIMEOUT` elapses
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) -> HarnessResult<()> {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(2));
    }
    if condition() {
        return Ok(());
    }
    Err(HarnessError::Timeout(format!(
        "{} within {:?}",
        what, WAIT_TIMEOUT
    )))
}

/// Session configuration with short reconnect delays and keepalive off
pub fn fast_config(name: &str, max_attempts: u32, delay_ms: u64) -> SessionConfig {
    SessionConfig::new(name)
        .with_reconnect(ReconnectPolicy::fixed(
            max_attempts,
            Duration::from_millis(delay_ms),
        ))
        .with_keepalive_interval_ms(0)
        .with_connect_timeout_ms(2000)
}
