//! Owning I/O loop
//!
//! The only place a session's connection handle lives. Runs on a dedicated
//! thread inside a current-thread tokio runtime and multiplexes three inputs:
//! work items injected from other threads, events from the open connection,
//! and the keepalive timer.

use super::shared::SessionShared;
use super::state::SessionState;
use super::supervisor;
use crate::config::ConnectionOptions;
use crate::lifecycle::ReconnectPolicy;
use crate::listener::SessionListener;
use crate::message::OutgoingMessage;
use crate::transport::{Connection, ConnectionEvent, ConnectionState, Connector, CLOSE_NORMAL};
use crate::{Error, Result};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Work item injected onto the owning loop
pub(crate) enum LoopCommand {
    /// Open a connection; `attempt` is 0 for the initial connect
    Connect { attempt: u32 },
    /// Drain the send slot onto the open connection
    Flush,
    /// Tear down and exit
    Quit,
    /// Result of a connect task spawned by this loop
    ConnectFinished {
        seq: u64,
        result: Result<Box<dyn Connection>>,
    },
}

struct ActiveConnection {
    id: u64,
    /// `<session>-<id>`
    log_name: String,
    handle: Box<dyn Connection>,
}

struct PendingConnect {
    seq: u64,
    token: CancellationToken,
}

pub(crate) struct OwningLoop {
    shared: Arc<SessionShared>,
    connector: Arc<dyn Connector>,
    url: String,
    options: ConnectionOptions,
    policy: ReconnectPolicy,
    commands_tx: UnboundedSender<LoopCommand>,
    commands: UnboundedReceiver<LoopCommand>,
    /// Cancelled by `stop` ahead of `Quit`; preempts sends and pings
    stop: CancellationToken,
    connection: Option<ActiveConnection>,
    pending_connect: Option<PendingConnect>,
    connect_seq: u64,
    supervisor: Option<JoinHandle<()>>,
}

impl OwningLoop {
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        connector: Arc<dyn Connector>,
        url: String,
        options: ConnectionOptions,
        policy: ReconnectPolicy,
        commands_tx: UnboundedSender<LoopCommand>,
        commands: UnboundedReceiver<LoopCommand>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            shared,
            connector,
            url,
            options,
            policy,
            commands_tx,
            commands,
            stop,
            connection: None,
            pending_connect: None,
            connect_seq: 0,
            supervisor: None,
        }
    }

    /// Run until `Quit`, then release the connection.
    ///
    /// Returns the supervisor thread so the caller can join it once the
    /// runtime is gone.
    pub(crate) async fn run(mut self) -> Option<JoinHandle<()>> {
        debug!(session = %self.shared.name, url = %self.url, "Owning loop started");

        let mut keepalive = self.options.keepalive_interval().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let ping_due = self.connection.is_some() && keepalive.is_some();

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                event = next_connection_event(&mut self.connection) => {
                    self.handle_event(event).await;
                }
                _ = next_tick(&mut keepalive), if ping_due => {
                    self.send_keepalive().await;
                }
            }
        }

        self.teardown().await;
        debug!(session = %self.shared.name, "Owning loop exited");
        self.supervisor.take()
    }

    /// Returns `false` when the loop should exit
    async fn handle_command(&mut self, command: LoopCommand) -> bool {
        match command {
            LoopCommand::Connect { attempt } => self.begin_connect(attempt),
            LoopCommand::ConnectFinished { seq, result } => self.finish_connect(seq, result).await,
            LoopCommand::Flush => self.flush().await,
            LoopCommand::Quit => return false,
        }
        true
    }

    fn listener(&self) -> Option<Arc<dyn SessionListener>> {
        self.shared.listener()
    }

    fn begin_connect(&mut self, attempt: u32) {
        if !self.shared.is_running() {
            debug!(session = %self.shared.name, attempt, "Session stopping, connect not started");
            return;
        }
        if self.pending_connect.is_some() {
            warn!(session = %self.shared.name, attempt, "Connect already in flight, request ignored");
            return;
        }
        if self.connection.is_some() {
            debug!(session = %self.shared.name, attempt, "Already connected, connect not started");
            self.shared.lock().connect_in_flight = false;
            return;
        }

        self.shared.transition(SessionState::Connecting);

        self.connect_seq += 1;
        let seq = self.connect_seq;
        let token = CancellationToken::new();

        info!(session = %self.shared.name, url = %self.url, attempt, "Connecting");

        let cancelled = token.clone();
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let options = self.options.clone();
        let tx = self.commands_tx.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancelled.cancelled() => {
                    Err(Error::Cancelled(format!("connect to {} cancelled", url)))
                }
                result = connector.connect(&url, &options) => result,
            };
            // Fails only once the loop has exited; teardown already ran
            let _ = tx.send(LoopCommand::ConnectFinished { seq, result });
        });

        self.pending_connect = Some(PendingConnect { seq, token });
    }

    async fn finish_connect(&mut self, seq: u64, result: Result<Box<dyn Connection>>) {
        let expected = self.pending_connect.as_ref().map(|pending| pending.seq);
        if expected != Some(seq) {
            if let Ok(mut stray) = result {
                debug!(session = %self.shared.name, seq, "Closing connection from superseded attempt");
                self.close_handle(stray.as_mut(), "superseded").await;
            }
            return;
        }
        self.pending_connect = None;

        match result {
            Ok(handle) => self.install_connection(handle).await,
            Err(e) if e.is_shutdown_related() => {
                debug!(session = %self.shared.name, error = %e, "Connect cancelled");
            }
            Err(e) => {
                error!(session = %self.shared.name, url = %self.url, error = %e, "Connect failed");
                if let Some(listener) = self.listener() {
                    listener.on_error(0, &e);
                }
                if e.is_retryable() {
                    self.schedule_reconnect();
                } else {
                    self.give_up("connect error is not retryable");
                }
            }
        }
    }

    async fn install_connection(&mut self, mut handle: Box<dyn Connection>) {
        if !self.shared.is_running() {
            debug!(session = %self.shared.name, "Session stopping, dropping new connection");
            self.close_handle(handle.as_mut(), "session stopped").await;
            return;
        }

        if let Some(mut previous) = self.connection.take() {
            info!(session = %previous.log_name, "Closing previous connection");
            self.close_handle(previous.handle.as_mut(), "replaced").await;
        }

        let id = self.shared.next_connection_id();
        let log_name = format!("{}-{}", self.shared.name, id);
        info!(session = %log_name, connection_id = id, url = %self.url, "Connected");

        self.connection = Some(ActiveConnection {
            id,
            log_name,
            handle,
        });

        let reset_attempts = self.policy.reset_on_connect;
        self.shared.transition_with(SessionState::Connected, |status| {
            status.connection_id = Some(id);
            status.connect_in_flight = false;
            if reset_attempts {
                status.attempts = 0;
            }
        });

        if let Some(listener) = self.listener() {
            listener.on_connected(id);
        }
    }

    async fn handle_event(&mut self, event: Option<ConnectionEvent>) {
        let Some(active) = self.connection.as_ref() else {
            return;
        };
        let id = active.id;

        match event {
            Some(ConnectionEvent::Message { kind, payload }) => {
                trace!(session = %active.log_name, %kind, bytes = payload.len(), "Message received");
                if let Some(listener) = self.listener() {
                    listener.on_message(id, kind, &payload);
                }
            }
            Some(ConnectionEvent::Pong(payload)) => {
                debug!(session = %active.log_name, bytes = payload.len(), "Pong received");
                if let Some(listener) = self.listener() {
                    listener.on_pong(id, &payload);
                }
            }
            Some(ConnectionEvent::Closed { code, reason }) => {
                self.handle_drop(code, reason).await;
            }
            Some(ConnectionEvent::Error(message)) => {
                warn!(session = %active.log_name, error = %message, "Connection error");
                if let Some(listener) = self.listener() {
                    listener.on_error(id, &Error::WebSocketError(message.clone()));
                }
                self.handle_drop(None, message).await;
            }
            None => {
                self.handle_drop(None, "stream ended".to_string()).await;
            }
        }
    }

    /// Release a connection the peer or the network took down and hand the
    /// session to the supervisor
    async fn handle_drop(&mut self, code: Option<u16>, reason: String) {
        let Some(mut active) = self.connection.take() else {
            return;
        };

        if active.handle.state() == ConnectionState::Open {
            self.close_handle(active.handle.as_mut(), "connection dropped").await;
        }
        self.shared.lock().connection_id = None;

        let dropped = Error::AbnormalClose(format!(
            "code {}, reason '{}'",
            code.map_or_else(|| "none".to_string(), |c| c.to_string()),
            reason
        ));
        warn!(session = %active.log_name, connection_id = active.id, error = %dropped, "Connection closed");

        if let Some(listener) = self.listener() {
            listener.on_closed(active.id, code, &reason);
        }

        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let exhausted = {
            let mut status = self.shared.lock();
            if !status.running {
                return;
            }
            status.connect_in_flight = false;
            !self.policy.should_retry(status.attempts)
        };

        if exhausted {
            self.give_up("attempt bound reached");
            return;
        }

        self.shared.transition(SessionState::Reconnecting);
        self.ensure_supervisor();
    }

    /// Park the session in `Idle`; only `start` resumes it
    fn give_up(&mut self, reason: &str) {
        let attempts = {
            let mut status = self.shared.lock();
            if !status.running {
                return;
            }
            status.connect_in_flight = false;
            status.attempts
        };
        warn!(
            session = %self.shared.name,
            attempts,
            max_attempts = self.policy.max_attempts,
            reason,
            "Giving up reconnecting"
        );
        self.shared
            .transition_with(SessionState::Idle, |status| status.gave_up = true);
    }

    /// Spawn the supervisor unless one is already waiting; a running
    /// supervisor was woken by the transition.
    fn ensure_supervisor(&mut self) {
        if let Some(handle) = self.supervisor.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        if let Some(finished) = self.supervisor.take() {
            if finished.join().is_err() {
                warn!(session = %self.shared.name, "Reconnect supervisor panicked");
            }
        }

        match supervisor::spawn(
            Arc::clone(&self.shared),
            self.policy.clone(),
            self.commands_tx.clone(),
        ) {
            Ok(handle) => self.supervisor = Some(handle),
            Err(e) => {
                error!(session = %self.shared.name, error = %e, "Failed to spawn reconnect supervisor");
                self.give_up("reconnect supervisor unavailable");
            }
        }
    }

    async fn flush(&mut self) {
        let Some(message) = self.shared.slot.take() else {
            return;
        };

        let active = match self.connection.as_mut() {
            Some(active) if active.handle.state() == ConnectionState::Open => active,
            _ => {
                let skipped = Error::SendSkipped(format!("no open connection, {} dropped", describe(&message)));
                debug!(session = %self.shared.name, error = %skipped, "Send skipped");
                return;
            }
        };

        let send = async {
            match &message {
                OutgoingMessage::Text(text) => active.handle.send_text(text).await,
                OutgoingMessage::Binary(payload) => active.handle.send_binary(payload).await,
            }
        };
        let result = tokio::select! {
            biased;
            _ = self.stop.cancelled() => {
                debug!(session = %self.shared.name, "Session stopping, send abandoned");
                return;
            }
            result = send => result,
        };

        match result {
            Ok(()) => trace!(session = %active.log_name, bytes = message.len(), "Message sent"),
            Err(e) if matches!(e, Error::SendSkipped(_)) => {
                debug!(session = %active.log_name, error = %e, "Send skipped");
            }
            Err(e) => warn!(session = %active.log_name, error = %e, "Send failed"),
        }
    }

    async fn send_keepalive(&mut self) {
        let Some(active) = self.connection.as_mut() else {
            return;
        };
        if active.handle.state() != ConnectionState::Open {
            return;
        }
        let result = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return,
            result = active.handle.ping(&[]) => result,
        };
        if let Err(e) = result {
            // The read side reports the drop
            debug!(session = %active.log_name, error = %e, "Keepalive ping failed");
        }
    }

    async fn close_handle(&self, handle: &mut dyn Connection, reason: &str) {
        match tokio::time::timeout(self.options.close_timeout(), handle.close(CLOSE_NORMAL, reason)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session = %self.shared.name, error = %e, "Close failed"),
            Err(_) => debug!(
                session = %self.shared.name,
                timeout_ms = self.options.close_timeout_ms,
                "Close handshake timed out"
            ),
        }
    }

    async fn teardown(&mut self) {
        self.shared.transition(SessionState::Closing);

        if let Some(pending) = self.pending_connect.take() {
            debug!(session = %self.shared.name, seq = pending.seq, "Cancelling in-flight connect");
            pending.token.cancel();
        }

        if let Some(mut active) = self.connection.take() {
            info!(session = %active.log_name, "Closing connection");
            self.close_handle(active.handle.as_mut(), "session stopped").await;
            if let Some(listener) = self.listener() {
                listener.on_closed(active.id, Some(CLOSE_NORMAL), "session stopped");
            }
        }

        // Connects that completed after Quit was queued
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let LoopCommand::ConnectFinished {
                result: Ok(mut stray),
                ..
            } = command
            {
                self.close_handle(stray.as_mut(), "session stopped").await;
            }
        }

        self.shared.transition_with(SessionState::Idle, |status| {
            status.connection_id = None;
            status.connect_in_flight = false;
        });
    }
}

async fn next_connection_event(connection: &mut Option<ActiveConnection>) -> Option<ConnectionEvent> {
    match connection {
        Some(active) => active.handle.next_event().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn describe(message: &OutgoingMessage) -> String {
    match message {
        OutgoingMessage::Text(text) => format!("text message of {} bytes", text.len()),
        OutgoingMessage::Binary(payload) => format!("binary message of {} bytes", payload.len()),
    }
}
