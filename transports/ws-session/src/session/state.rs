//! Session lifecycle state

use std::fmt;

/// Session state machine
///
/// ```text
/// Idle → Connecting → Connected → Closing → Idle
///            ↓    ↑         ↓
///          Reconnecting ←───┘
/// ```
///
/// `Reconnecting` settles in `Idle` once the attempt bound is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not running, or gave up reconnecting
    Idle,
    /// Connect attempt in flight
    Connecting,
    /// Connection open
    Connected,
    /// Waiting for the supervisor to issue the next attempt
    Reconnecting,
    /// `stop` in progress
    Closing,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Reconnecting => write!(f, "reconnecting"),
            SessionState::Closing => write!(f, "closing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(SessionState::Idle.to_string(), "idle");
    }

    #[test]
    fn test_only_idle_is_inactive() {
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Connecting.is_active());
        assert!(SessionState::Closing.is_active());
    }
}
