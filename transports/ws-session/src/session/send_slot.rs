//! Latest-wins pending message slot shared by callers, the send loop and
//! the owning loop

use crate::message::OutgoingMessage;
use parking_lot::{Condvar, Mutex};

pub(crate) struct SendSlot {
    inner: Mutex<SlotInner>,
    condvar: Condvar,
}

#[derive(Default)]
struct SlotInner {
    pending: Option<OutgoingMessage>,
    signalled: bool,
    shutdown: bool,
}

impl SendSlot {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner::default()),
            condvar: Condvar::new(),
        }
    }

    /// Store `message` as the latest pending message and wake the send loop.
    ///
    /// Returns the unsent message it replaced, if any.
    pub(crate) fn put(&self, message: OutgoingMessage) -> Option<OutgoingMessage> {
        let mut inner = self.inner.lock();
        let replaced = inner.pending.replace(message);
        inner.signalled = true;
        self.condvar.notify_one();
        replaced
    }

    /// Take the pending message, leaving the slot empty
    pub(crate) fn take(&self) -> Option<OutgoingMessage> {
        self.inner.lock().pending.take()
    }

    /// Block until a message was put or shutdown was requested.
    ///
    /// Returns `false` on shutdown. A `put` that happened before the call
    /// is not lost.
    pub(crate) fn wait(&self) -> bool {
        let mut inner = self.inner.lock();
        self.condvar
            .wait_while(&mut inner, |inner| !inner.signalled && !inner.shutdown);

        if inner.shutdown {
            return false;
        }
        inner.signalled = false;
        true
    }

    pub(crate) fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        inner.pending = None;
        self.condvar.notify_all();
    }

    /// Re-arm the slot for a fresh `start`
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = SlotInner::default();
    }
}
