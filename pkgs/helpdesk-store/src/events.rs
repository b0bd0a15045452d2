//! Live delivery events
//!
//! Each event travels as a named frame with a JSON payload. The names are
//! fixed: `connected`, `initial-messages`, `new-message`, `heartbeat`, `error`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Message;

pub const CONNECTED: &str = "connected";
pub const INITIAL_MESSAGES: &str = "initial-messages";
pub const NEW_MESSAGE: &str = "new-message";
pub const HEARTBEAT: &str = "heartbeat";
pub const ERROR: &str = "error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialMessagesPayload {
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessagePayload {
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub timestamp: DateTime<Utc>,
}

/// Non-fatal server problem; the text never carries storage details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Event pushed from a delivery channel to a stream consumer
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected(ConnectedPayload),
    InitialMessages(InitialMessagesPayload),
    NewMessage(NewMessagePayload),
    Heartbeat(HeartbeatPayload),
    Error(ErrorPayload),
}

impl StreamEvent {
    pub fn connected(conversation_id: impl Into<String>) -> Self {
        StreamEvent::Connected(ConnectedPayload {
            conversation_id: conversation_id.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn heartbeat() -> Self {
        StreamEvent::Heartbeat(HeartbeatPayload {
            timestamp: Utc::now(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Frame name of the event
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Connected(_) => CONNECTED,
            StreamEvent::InitialMessages(_) => INITIAL_MESSAGES,
            StreamEvent::NewMessage(_) => NEW_MESSAGE,
            StreamEvent::Heartbeat(_) => HEARTBEAT,
            StreamEvent::Error(_) => ERROR,
        }
    }

    /// JSON payload of the event
    pub fn data_json(&self) -> serde_json::Result<String> {
        match self {
            StreamEvent::Connected(p) => serde_json::to_string(p),
            StreamEvent::InitialMessages(p) => serde_json::to_string(p),
            StreamEvent::NewMessage(p) => serde_json::to_string(p),
            StreamEvent::Heartbeat(p) => serde_json::to_string(p),
            StreamEvent::Error(p) => serde_json::to_string(p),
        }
    }

    /// Rebuild an event from its frame name and payload.
    ///
    /// Returns `Ok(None)` for frame names this protocol does not define.
    pub fn from_frame(name: &str, data: &str) -> serde_json::Result<Option<Self>> {
        let event = match name {
            CONNECTED => StreamEvent::Connected(serde_json::from_str(data)?),
            INITIAL_MESSAGES => StreamEvent::InitialMessages(serde_json::from_str(data)?),
            NEW_MESSAGE => StreamEvent::NewMessage(serde_json::from_str(data)?),
            HEARTBEAT => StreamEvent::Heartbeat(serde_json::from_str(data)?),
            ERROR => StreamEvent::Error(serde_json::from_str(data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
