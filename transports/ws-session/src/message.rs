//! Message types exchanged over a session

use serde::{Deserialize, Serialize};
use std::fmt;

/// WebSocket data frame kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// UTF-8 text frame
    Text,
    /// Binary frame
    Binary,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Text => write!(f, "text"),
            MessageKind::Binary => write!(f, "binary"),
        }
    }
}

/// Outgoing message held in the session's pending slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Abstract outgoing message accepted by `Session::send_async`
///
/// `to_binary_payload` may return `None`, in which case a binary message is
/// dropped before it reaches the pending slot.
pub trait ClientMessage {
    fn kind(&self) -> MessageKind;

    fn to_text(&self) -> String;

    fn to_binary_payload(&self) -> Option<Vec<u8>>;
}

impl OutgoingMessage {
    /// Convert an abstract message into the owned variant
    pub fn from_message<M: ClientMessage + ?Sized>(message: &M) -> Option<Self> {
        match message.kind() {
            MessageKind::Text => Some(OutgoingMessage::Text(message.to_text())),
            MessageKind::Binary => message.to_binary_payload().map(OutgoingMessage::Binary),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OutgoingMessage::Text(text) => text.len(),
            OutgoingMessage::Binary(payload) => payload.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClientMessage for OutgoingMessage {
    fn kind(&self) -> MessageKind {
        match self {
            OutgoingMessage::Text(_) => MessageKind::Text,
            OutgoingMessage::Binary(_) => MessageKind::Binary,
        }
    }

    fn to_text(&self) -> String {
        match self {
            OutgoingMessage::Text(text) => text.clone(),
            OutgoingMessage::Binary(payload) => String::from_utf8_lossy(payload).into_owned(),
        }
    }

    fn to_binary_payload(&self) -> Option<Vec<u8>> {
        match self {
            OutgoingMessage::Text(text) => Some(text.as_bytes().to_vec()),
            OutgoingMessage::Binary(payload) => Some(payload.clone()),
        }
    }
}

impl From<String> for OutgoingMessage {
    fn from(text: String) -> Self {
        OutgoingMessage::Text(text)
    }
}

impl From<&str> for OutgoingMessage {
    fn from(text: &str) -> Self {
        OutgoingMessage::Text(text.to_string())
    }
}

impl From<Vec<u8>> for OutgoingMessage {
    fn from(payload: Vec<u8>) -> Self {
        OutgoingMessage::Binary(payload)
    }
}
