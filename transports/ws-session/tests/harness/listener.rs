//! Listener that records every callback

use parking_lot::Mutex;
use ws_session::{Error, MessageKind, SessionListener, SessionState};

#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    Connected(u64),
    Message {
        connection_id: u64,
        kind: MessageKind,
        payload: Vec<u8>,
    },
    Closed {
        connection_id: u64,
        code: Option<u16>,
    },
    Error {
        connection_id: u64,
        message: String,
    },
    Pong(u64),
    State {
        from: SessionState,
        to: SessionState,
    },
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().clone()
    }

    /// Target state of every recorded transition, in order
    pub fn states(&self) -> Vec<SessionState> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ListenerEvent::State { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<(u64, MessageKind, Vec<u8>)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ListenerEvent::Message {
                    connection_id,
                    kind,
                    payload,
                } => Some((*connection_id, *kind, payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn connected_ids(&self) -> Vec<u64> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ListenerEvent::Connected(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> Vec<(u64, Option<u16>)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ListenerEvent::Closed {
                    connection_id,
                    code,
                } => Some((*connection_id, *code)),
                _ => None,
            })
            .collect()
    }

    pub fn error_count(&self) -> usize {
        self.count(|event| matches!(event, ListenerEvent::Error { .. }))
    }

    pub fn pong_count(&self) -> usize {
        self.count(|event| matches!(event, ListenerEvent::Pong(_)))
    }

    fn count(&self, predicate: impl Fn(&ListenerEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }

    fn record(&self, event: ListenerEvent) {
        self.events.lock().push(event);
    }
}

impl SessionListener for RecordingListener {
    fn on_message(&self, connection_id: u64, kind: MessageKind, payload: &[u8]) {
        self.record(ListenerEvent::Message {
            connection_id,
            kind,
            payload: payload.to_vec(),
        });
    }

    fn on_connected(&self, connection_id: u64) {
        self.record(ListenerEvent::Connected(connection_id));
    }

    fn on_closed(&self, connection_id: u64, code: Option<u16>, _reason: &str) {
        self.record(ListenerEvent::Closed {
            connection_id,
            code,
        });
    }

    fn on_error(&self, connection_id: u64, error: &Error) {
        self.record(ListenerEvent::Error {
            connection_id,
            message: error.to_string(),
        });
    }

    fn on_pong(&self, connection_id: u64, _payload: &[u8]) {
        self.record(ListenerEvent::Pong(connection_id));
    }

    fn on_state_change(&self, from: SessionState, to: SessionState) {
        self.record(ListenerEvent::State { from, to });
    }
}
