//! Client session: one logical connection to a remote WebSocket endpoint
//!
//! A running session owns three threads:
//!
//! - `<name>-recv`: the owning loop, a current-thread tokio runtime that holds
//!   the connection handle and performs every protocol call
//! - `<name>-send`: waits on the send slot and injects a flush work item onto
//!   the owning loop for each `send_async`
//! - `<name>-reconnect`: the reconnect supervisor, spawned on the first drop
//!
//! `start`, `send_async` and `stop` may be called from any thread.

mod owning_loop;
mod send_slot;
mod shared;
mod state;
mod supervisor;

pub use state::SessionState;

use crate::config::SessionConfig;
use crate::listener::SessionListener;
use crate::message::{ClientMessage, OutgoingMessage};
use crate::transport::{Connector, TungsteniteConnector};
use crate::{Error, Result};
use owning_loop::{LoopCommand, OwningLoop};
use parking_lot::Mutex;
use shared::{SessionShared, SessionStatus};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Threads and channel of a running session
struct RunHandles {
    commands: UnboundedSender<LoopCommand>,
    stop: CancellationToken,
    receive_thread: JoinHandle<()>,
    send_thread: JoinHandle<()>,
}

/// WebSocket client session with bounded automatic reconnect
///
/// Constructing a session starts nothing; `start` spawns the session threads
/// and `stop` (or drop) joins them.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use ws_session::{MessageKind, OutgoingMessage, Session, SessionConfig, SessionListener};
///
/// struct Printer;
///
/// impl SessionListener for Printer {
///     fn on_message(&self, connection_id: u64, kind: MessageKind, payload: &[u8]) {
///         println!("[{}] {} frame, {} bytes", connection_id, kind, payload.len());
///     }
/// }
///
/// let session = Session::new(SessionConfig::new("demo"));
/// let listener: Arc<dyn SessionListener> = Arc::new(Printer);
/// session.start("ws://127.0.0.1:8088/test", Arc::clone(&listener))?;
/// session.send_async(&OutgoingMessage::from("hello"));
/// session.stop();
/// # Ok::<(), ws_session::Error>(())
/// ```
pub struct Session {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<SessionShared>,
    run: Mutex<Option<RunHandles>>,
}

impl Session {
    /// Create a session that connects with `tokio-tungstenite`
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, Arc::new(TungsteniteConnector::new()))
    }

    /// Create a session with a custom transport
    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let shared = SessionShared::new(config.name.clone());
        Self {
            config,
            connector,
            shared,
            run: Mutex::new(None),
        }
    }

    /// Begin connecting to `address`
    ///
    /// Idempotent while running. A session that gave up reconnecting is
    /// shut down and started afresh. The listener is held weakly; the caller
    /// keeps it alive.
    ///
    /// The initial `Idle → Connecting` state change is reported to the
    /// listener from this call; every later callback runs on the owning loop.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidConfig` if `address` is empty or the session
    ///   configuration does not validate; nothing is spawned
    /// - `Error::IoError` if a session thread cannot be spawned
    pub fn start(&self, address: &str, listener: Arc<dyn SessionListener>) -> Result<()> {
        let address = address.trim();
        if address.is_empty() {
            error!(session = %self.shared.name, "Cannot start session: address is empty");
            return Err(Error::InvalidConfig("address must not be empty".to_string()));
        }
        if let Err(e) = self.config.validate() {
            error!(session = %self.shared.name, error = %e, "Cannot start session");
            return Err(e);
        }

        let mut run = self.run.lock();
        if let Some(handles) = run.take() {
            if !self.shared.lock().gave_up {
                debug!(session = %self.shared.name, "Session already running");
                *run = Some(handles);
                return Ok(());
            }
            info!(session = %self.shared.name, "Restarting session that gave up reconnecting");
            self.shutdown(handles);
        }

        *self.shared.lock() = SessionStatus {
            running: true,
            connect_in_flight: true,
            ..SessionStatus::default()
        };
        self.shared.slot.reset();
        self.shared.set_listener(&listener);
        self.shared.transition(SessionState::Connecting);

        let (commands, receiver) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        // Queued ahead of any Quit, so stop before the loop runs is still ordered
        let _ = commands.send(LoopCommand::Connect { attempt: 0 });

        let owning_loop = OwningLoop::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            address.to_string(),
            self.config.connection.clone(),
            self.config.reconnect.clone(),
            commands.clone(),
            receiver,
            stop.clone(),
        );

        let receive_thread = {
            let shared = Arc::clone(&self.shared);
            thread::Builder::new()
                .name(format!("{}-recv", self.shared.name))
                .spawn(move || run_owning_loop(shared, owning_loop))
        };
        let receive_thread = match receive_thread {
            Ok(handle) => handle,
            Err(e) => {
                error!(session = %self.shared.name, error = %e, "Failed to spawn owning loop thread");
                self.reset_after_failed_start();
                return Err(Error::IoError(e));
            }
        };

        let send_thread = {
            let shared = Arc::clone(&self.shared);
            let commands = commands.clone();
            thread::Builder::new()
                .name(format!("{}-send", self.shared.name))
                .spawn(move || run_send_loop(&shared, &commands))
        };
        let send_thread = match send_thread {
            Ok(handle) => handle,
            Err(e) => {
                error!(session = %self.shared.name, error = %e, "Failed to spawn send loop thread");
                self.shared.lock().running = false;
                self.shared.status_cv.notify_all();
                stop.cancel();
                let _ = commands.send(LoopCommand::Quit);
                if receive_thread.join().is_err() {
                    warn!(session = %self.shared.name, "Owning loop panicked");
                }
                self.reset_after_failed_start();
                return Err(Error::IoError(e));
            }
        };

        *run = Some(RunHandles {
            commands,
            stop,
            receive_thread,
            send_thread,
        });

        info!(session = %self.shared.name, address = %address, "Session started");
        Ok(())
    }

    /// Queue `message` as the latest pending message
    ///
    /// Never blocks. A message still pending when the next one arrives is
    /// replaced. Messages are dropped while the session is stopped or has no
    /// open connection.
    pub fn send_async<M: ClientMessage + ?Sized>(&self, message: &M) {
        if !self.shared.is_running() {
            debug!(session = %self.shared.name, "Session not running, message dropped");
            return;
        }

        let Some(message) = OutgoingMessage::from_message(message) else {
            debug!(session = %self.shared.name, "Binary message without payload dropped");
            return;
        };

        if let Some(replaced) = self.shared.slot.put(message) {
            trace!(
                session = %self.shared.name,
                bytes = replaced.len(),
                "Unsent message replaced"
            );
        }
    }

    /// Convenience for `send_async` with a text message
    pub fn send_text(&self, text: impl Into<String>) {
        self.send_async(&OutgoingMessage::Text(text.into()));
    }

    /// Convenience for `send_async` with a binary message
    pub fn send_binary(&self, payload: impl Into<Vec<u8>>) {
        self.send_async(&OutgoingMessage::Binary(payload.into()));
    }

    /// Stop the session and join its threads
    ///
    /// Safe to call at any point of the lifecycle, including before the
    /// first connect completes, and more than once. A send blocked inside the
    /// connection is abandoned. Must not be called from inside a listener
    /// callback.
    pub fn stop(&self) {
        let mut run = self.run.lock();
        match run.take() {
            Some(handles) => self.shutdown(handles),
            None => debug!(session = %self.shared.name, "Session not running"),
        }
    }

    fn shutdown(&self, handles: RunHandles) {
        debug!(session = %self.shared.name, "Stopping session");

        self.shared.lock().running = false;
        self.shared.status_cv.notify_all();

        handles.stop.cancel();
        if handles.commands.send(LoopCommand::Quit).is_err() {
            let race = Error::ShutdownRace("owning loop already exited".to_string());
            debug!(session = %self.shared.name, error = %race, "Quit not delivered");
        }
        self.shared.slot.shutdown();

        if handles.send_thread.join().is_err() {
            warn!(session = %self.shared.name, "Send loop panicked");
        }
        if handles.receive_thread.join().is_err() {
            warn!(session = %self.shared.name, "Owning loop panicked");
        }

        self.shared.transition_with(SessionState::Idle, |status| {
            status.connection_id = None;
            status.connect_in_flight = false;
        });

        info!(session = %self.shared.name, "Session stopped");
    }

    fn reset_after_failed_start(&self) {
        *self.shared.lock() = SessionStatus::default();
        self.shared.slot.shutdown();
        self.shared.transition(SessionState::Idle);
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Reconnect attempts issued since the last `start`
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().attempts
    }

    /// `true` between `start` and `stop`, including after giving up
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// `true` once the attempt bound was exceeded; cleared by `start`
    pub fn has_given_up(&self) -> bool {
        self.shared.lock().gave_up
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Id of the open connection, if any
    pub fn connection_id(&self) -> Option<u64> {
        self.shared.lock().connection_id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_owning_loop(shared: Arc<SessionShared>, owning_loop: OwningLoop) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(session = %shared.name, error = %e, "Failed to build owning loop runtime");
            shared.transition_with(SessionState::Idle, |status| {
                status.gave_up = true;
                status.connect_in_flight = false;
            });
            return;
        }
    };

    let supervisor = runtime.block_on(owning_loop.run());
    // Drops connect tasks that never got to observe cancellation
    drop(runtime);

    if let Some(handle) = supervisor {
        if handle.join().is_err() {
            warn!(session = %shared.name, "Reconnect supervisor panicked");
        }
    }
}

fn run_send_loop(shared: &SessionShared, commands: &UnboundedSender<LoopCommand>) {
    debug!(session = %shared.name, "Send loop started");

    while shared.slot.wait() {
        if commands.send(LoopCommand::Flush).is_err() {
            break;
        }
    }

    debug!(session = %shared.name, "Send loop exited");
}
