//! Listener interface for session events
//!
//! Methods are invoked synchronously on the session's owning loop thread. The
//! one exception is the initial `Idle → Connecting` state change, which
//! `Session::start` reports on the calling thread.
//!
//! Implementations must return quickly and must not call `Session::stop` from
//! inside a callback (stop joins the thread the callback runs on).

use crate::error::Error;
use crate::message::MessageKind;
use crate::session::SessionState;

pub trait SessionListener: Send + Sync {
    /// A data frame arrived on connection `connection_id`
    fn on_message(&self, connection_id: u64, kind: MessageKind, payload: &[u8]);

    fn on_connected(&self, _connection_id: u64) {}

    fn on_closed(&self, _connection_id: u64, _code: Option<u16>, _reason: &str) {}

    /// Connect failure or connection error. `connection_id` is 0 when no
    /// connection was established.
    fn on_error(&self, _connection_id: u64, _error: &Error) {}

    fn on_pong(&self, _connection_id: u64, _payload: &[u8]) {}

    /// The first call after `start` comes from the thread that called it
    fn on_state_change(&self, _old: SessionState, _new: SessionState) {}
}
