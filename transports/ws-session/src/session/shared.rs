//! State shared between the caller's thread, the owning loop, the send loop
//! and the reconnect supervisor

use super::send_slot::SendSlot;
use super::state::SessionState;
use crate::listener::SessionListener;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Fields guarded by `SessionShared::status`
#[derive(Debug, Clone)]
pub(crate) struct SessionStatus {
    pub state: SessionState,
    /// Reconnect attempts issued since the last `start`
    pub attempts: u32,
    /// Cleared by `stop`; every loop checks it before doing work
    pub running: bool,
    /// A connect was issued and has not yet completed
    pub connect_in_flight: bool,
    /// Attempt bound exceeded; the session parked in `Idle`
    pub gave_up: bool,
    pub connection_id: Option<u64>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            attempts: 0,
            running: false,
            connect_in_flight: false,
            gave_up: false,
            connection_id: None,
        }
    }
}

pub(crate) struct SessionShared {
    pub name: String,
    pub status: Mutex<SessionStatus>,
    /// Signalled on every change the supervisor waits on
    pub status_cv: Condvar,
    pub slot: SendSlot,
    listener: Mutex<Option<Weak<dyn SessionListener>>>,
    next_connection_id: AtomicU64,
}

impl SessionShared {
    pub(crate) fn new(name: String) -> Arc<Self> {
        Arc::new(Self {
            name,
            status: Mutex::new(SessionStatus::default()),
            status_cv: Condvar::new(),
            slot: SendSlot::new(),
            listener: Mutex::new(None),
            next_connection_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock()
    }

    /// Connection ids are unique for the lifetime of the session, across
    /// restarts
    pub(crate) fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn set_listener(&self, listener: &Arc<dyn SessionListener>) {
        *self.listener.lock() = Some(Arc::downgrade(listener));
    }

    /// Upgrade the registered listener; `None` once the caller dropped it
    pub(crate) fn listener(&self) -> Option<Arc<dyn SessionListener>> {
        self.listener.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Move to `new`, notify waiters and report the change to the listener.
    ///
    /// The listener is called after the status lock is released.
    pub(crate) fn transition(&self, new: SessionState) {
        self.transition_with(new, |_| {});
    }

    /// Like `transition`, applying `update` in the same critical section
    pub(crate) fn transition_with(&self, new: SessionState, update: impl FnOnce(&mut SessionStatus)) {
        let old = {
            let mut status = self.lock();
            update(&mut status);
            let old = status.state;
            status.state = new;
            old
        };
        self.status_cv.notify_all();

        if old != new {
            tracing::debug!(session = %self.name, from = %old, to = %new, "Session state changed");
            if let Some(listener) = self.listener() {
                listener.on_state_change(old, new);
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().running
    }
}
