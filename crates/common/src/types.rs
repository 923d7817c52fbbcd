// Core domain types shared between the parley server and its clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum message body length in characters, enforced after trimming.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Delivery/lifecycle state of a chat message.
///
/// Transitions are monotonic with respect to deletion: once a message is
/// `Deleted` it can never move to another state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Read,
    Edited,
    Deleted,
}

impl MessageStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Read => "read",
            Self::Edited => "edited",
            Self::Deleted => "deleted",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "sent" => Some(Self::Sent),
            "read" => Some(Self::Read),
            "edited" => Some(Self::Edited),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    pub const fn is_deleted(self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// A persistent conversation context between exactly two principals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRoom {
    pub id: i64,
    /// Canonical slug for the participant pair; see [`room_slug`].
    pub slug: String,
    pub initiator_id: i64,
    pub counterpart_id: i64,
    /// Soft-delete flag; an inactive room behaves as absent.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatRoom {
    /// True when `user_id` is one of the two room participants.
    pub fn has_participant(&self, user_id: i64) -> bool {
        self.initiator_id == user_id || self.counterpart_id == user_id
    }
}

/// A single chat message within a room.
///
/// The `id` is monotonically increasing per store and doubles as the
/// history-replay cursor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: i64,
    pub room_id: i64,
    pub author_id: i64,
    pub recipient_id: i64,
    pub body: String,
    pub attachment_url: Option<String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derive the canonical room slug for an unordered pair of principal ids.
///
/// The lower id always comes first, so (a, b) and (b, a) map to the same
/// slug and the one-active-room-per-pair invariant can be enforced with a
/// unique index on the slug column.
pub fn room_slug(user_a: i64, user_b: i64) -> String {
    let (low, high) = if user_a <= user_b { (user_a, user_b) } else { (user_b, user_a) };
    format!("chat-{low}-{high}")
}
