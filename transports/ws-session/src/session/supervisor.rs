//! Reconnect supervisor
//!
//! Runs on its own thread while the session is running. Each time the owning
//! loop parks the session in `Reconnecting` it waits out the policy delay
//! (waking early on `stop`), bumps the attempt counter and asks the owning
//! loop for a new connect. The owning loop is the only place connects are
//! actually started, so at most one is ever in flight.

use super::owning_loop::LoopCommand;
use super::shared::SessionShared;
use super::state::SessionState;
use crate::lifecycle::ReconnectPolicy;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

pub(crate) fn spawn(
    shared: Arc<SessionShared>,
    policy: ReconnectPolicy,
    commands: UnboundedSender<LoopCommand>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{}-reconnect", shared.name))
        .spawn(move || run(&shared, &policy, &commands))
}

fn run(shared: &SessionShared, policy: &ReconnectPolicy, commands: &UnboundedSender<LoopCommand>) {
    debug!(session = %shared.name, "Reconnect supervisor started");

    let mut status = shared.lock();
    loop {
        shared.status_cv.wait_while(&mut status, |s| {
            s.running
                && !s.gave_up
                && !(s.state == SessionState::Reconnecting && !s.connect_in_flight)
        });

        if !status.running || status.gave_up {
            break;
        }

        let delay = policy.delay_for(status.attempts);
        debug!(
            session = %shared.name,
            attempt = status.attempts + 1,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Waiting before reconnect"
        );

        // Returns early once `stop` clears `running`
        shared
            .status_cv
            .wait_while_for(&mut status, |s| s.running, delay);

        if !status.running {
            break;
        }
        if status.state != SessionState::Reconnecting || status.connect_in_flight {
            continue;
        }

        status.attempts += 1;
        status.connect_in_flight = true;
        let attempt = status.attempts;

        info!(
            session = %shared.name,
            attempt,
            max_attempts = policy.max_attempts,
            "Reconnecting"
        );

        if commands.send(LoopCommand::Connect { attempt }).is_err() {
            // Owning loop is gone; nothing left to reconnect
            status.connect_in_flight = false;
            break;
        }
    }
    drop(status);

    debug!(session = %shared.name, "Reconnect supervisor exited");
}
