// WebSocket frame types for the parley chat protocol.
//
// Frames are JSON objects discriminated by a `type` field. Inbound frames
// with no `type` decode as `chat_message`; unrecognized fields are ignored.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discriminator assumed when an inbound frame omits `type`.
pub const DEFAULT_EVENT_TYPE: &str = "chat_message";

/// Application close codes used when a connection attempt is rejected.
///
/// The websocket close-code range 4000-4999 is reserved for applications;
/// these mirror the HTTP statuses a browser client would expect.
pub mod close_code {
    /// No authenticated principal on the ambient session.
    pub const UNAUTHORIZED: u16 = 4401;
    /// Anti-forgery token missing or mismatched.
    pub const FORBIDDEN: u16 = 4403;
    /// Room or counterpart absent.
    pub const NOT_FOUND: u16 = 4404;
    /// Unexpected failure during the connect sequence.
    pub const SERVER_ERROR: u16 = 4500;
}

/// Client -> server frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Liveness probe; answered with [`ServerEvent::Pong`], no store access.
    Ping,

    /// Send a new message to the room. The default when `type` is absent.
    ChatMessage {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment_url: Option<String>,
    },

    /// Replace the body of an own, previously sent message.
    EditMessage { message_id: i64, new_content: String },

    /// Soft-delete an own, previously sent message.
    DeleteMessage { message_id: i64 },
}

/// Server -> client frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake accepted; always the first frame on a successful connect.
    HandshakeComplete { status: String, user_id: i64, room_name: String },

    /// Handshake rejected; followed by a close frame.
    HandshakeFailed { error: String },

    /// A message, either replayed history or a live broadcast.
    ChatMessage {
        message: String,
        sender: String,
        author_id: i64,
        timestamp: String,
        id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment_url: Option<String>,
    },

    /// Broadcast after an author edited a message.
    MessageEdited { message_id: i64, new_content: String, sender: String, date_updated: String },

    /// Acknowledgement sent to the editing session alone.
    EditSuccess { message_id: i64 },

    /// Broadcast after an author soft-deleted a message.
    MessageDeleted { message_id: i64, sender: String },

    /// Sender-only report of a failed or denied action; the connection
    /// stays open.
    Error { message: String },

    /// Reply to [`ClientEvent::Ping`].
    Pong { message: String },
}

impl ServerEvent {
    pub fn handshake_complete(user_id: i64, room_name: impl Into<String>) -> Self {
        Self::HandshakeComplete {
            status: "success".to_string(),
            user_id,
            room_name: room_name.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame payload is not a JSON object")]
    NotAnObject,
    #[error("invalid frame payload: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Decode an inbound text frame, defaulting an absent `type` discriminator
/// to [`DEFAULT_EVENT_TYPE`].
pub fn decode_client_event(raw: &str) -> Result<ClientEvent, DecodeError> {
    let mut value: serde_json::Value = serde_json::from_str(raw)?;
    let object = value.as_object_mut().ok_or(DecodeError::NotAnObject)?;
    object
        .entry("type")
        .or_insert_with(|| serde_json::Value::String(DEFAULT_EVENT_TYPE.to_string()));
    Ok(serde_json::from_value(value)?)
}

pub fn encode_server_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
