// Persistence adapter for rooms and messages.
//
// `Postgres` is the production backend; `Memory` backs hermetic tests. Both
// implement the same contract: idempotent room get-or-create keyed on the
// canonical pair slug, message create/fetch/edit/soft-delete, and
// cursor-bounded history replay that excludes deleted rows.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use parley_common::types::{ChatMessage, ChatRoom, MessageStatus};
use sqlx::PgPool;
use tokio::sync::RwLock;

#[derive(Clone)]
pub enum ChatStore {
    Postgres(PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<MemoryChatState>>),
}

#[derive(Debug)]
pub struct MemoryChatState {
    rooms: HashMap<String, ChatRoom>,
    messages: BTreeMap<i64, ChatMessage>,
    next_room_id: i64,
    next_message_id: i64,
}

impl Default for MemoryChatState {
    fn default() -> Self {
        Self {
            rooms: HashMap::new(),
            messages: BTreeMap::new(),
            next_room_id: 1,
            next_message_id: 1,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RoomRow {
    id: i64,
    slug: String,
    initiator_id: i64,
    counterpart_id: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RoomRow> for ChatRoom {
    fn from(row: RoomRow) -> Self {
        Self {
            id: row.id,
            slug: row.slug,
            initiator_id: row.initiator_id,
            counterpart_id: row.counterpart_id,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    room_id: i64,
    author_id: i64,
    recipient_id: i64,
    body: String,
    attachment_url: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let status = MessageStatus::from_db_value(&row.status)
            .ok_or_else(|| anyhow!("invalid message status '{}' in database", row.status))?;
        Ok(Self {
            id: row.id,
            room_id: row.room_id,
            author_id: row.author_id,
            recipient_id: row.recipient_id,
            body: row.body,
            attachment_url: row.attachment_url,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl ChatStore {
    /// Idempotent get-or-create for the room identified by `slug`.
    ///
    /// Concurrent calls for the same pair converge on one row: the insert
    /// is `ON CONFLICT DO NOTHING` against the unique slug index, and the
    /// winner's row is re-read afterwards. Returns `Ok(None)` when the room
    /// exists but has been soft-deleted — an inactive room behaves as
    /// absent and is never resurrected here.
    pub async fn get_or_create_room(
        &self,
        slug: &str,
        initiator_id: i64,
        counterpart_id: i64,
    ) -> Result<Option<ChatRoom>> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO chat_rooms (slug, initiator_id, counterpart_id) \
                     VALUES ($1, $2, $3) \
                     ON CONFLICT (slug) DO NOTHING",
                )
                .bind(slug)
                .bind(initiator_id)
                .bind(counterpart_id)
                .execute(pool)
                .await
                .context("failed to upsert chat room")?;

                let row = sqlx::query_as::<_, RoomRow>(
                    "SELECT id, slug, initiator_id, counterpart_id, is_active, \
                            created_at, updated_at \
                     FROM chat_rooms WHERE slug = $1",
                )
                .bind(slug)
                .fetch_one(pool)
                .await
                .context("failed to read chat room after upsert")?;

                let room = ChatRoom::from(row);
                Ok(room.is_active.then_some(room))
            }
            Self::Memory(state) => {
                let mut guard = state.write().await;
                if let Some(room) = guard.rooms.get(slug) {
                    return Ok(room.is_active.then(|| room.clone()));
                }

                let now = Utc::now();
                let room = ChatRoom {
                    id: guard.next_room_id,
                    slug: slug.to_string(),
                    initiator_id,
                    counterpart_id,
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                };
                guard.next_room_id += 1;
                guard.rooms.insert(slug.to_string(), room.clone());
                Ok(Some(room))
            }
        }
    }

    /// Persist a new message with status `sent`.
    pub async fn create_message(
        &self,
        room: &ChatRoom,
        author_id: i64,
        recipient_id: i64,
        body: String,
        attachment_url: Option<String>,
    ) -> Result<ChatMessage> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, MessageRow>(
                    "INSERT INTO chat_messages \
                         (room_id, author_id, recipient_id, body, attachment_url) \
                     VALUES ($1, $2, $3, $4, $5) \
                     RETURNING id, room_id, author_id, recipient_id, body, attachment_url, status, created_at, updated_at",
                )
                .bind(room.id)
                .bind(author_id)
                .bind(recipient_id)
                .bind(&body)
                .bind(&attachment_url)
                .fetch_one(pool)
                .await
                .context("failed to persist chat message")?;

                ChatMessage::try_from(row)
            }
            Self::Memory(state) => {
                let mut guard = state.write().await;
                let now = Utc::now();
                let message = ChatMessage {
                    id: guard.next_message_id,
                    room_id: room.id,
                    author_id,
                    recipient_id,
                    body,
                    attachment_url,
                    status: MessageStatus::Sent,
                    created_at: now,
                    updated_at: now,
                };
                guard.next_message_id += 1;
                guard.messages.insert(message.id, message.clone());
                Ok(message)
            }
        }
    }

    /// Fetch a message by id with no status filtering, so ownership checks
    /// can run against soft-deleted rows too.
    pub async fn message_by_id(&self, message_id: i64) -> Result<Option<ChatMessage>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, MessageRow>(
                    "SELECT id, room_id, author_id, recipient_id, body, attachment_url, status, created_at, updated_at \
                     FROM chat_messages WHERE id = $1",
                )
                .bind(message_id)
                .fetch_optional(pool)
                .await
                .context("failed to fetch chat message")?;

                row.map(ChatMessage::try_from).transpose()
            }
            Self::Memory(state) => Ok(state.read().await.messages.get(&message_id).cloned()),
        }
    }

    /// Replace a message body and move it to status `edited`.
    pub async fn apply_edit(
        &self,
        message_id: i64,
        new_body: String,
    ) -> Result<Option<ChatMessage>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, MessageRow>(
                    "UPDATE chat_messages \
                     SET body = $2, status = 'edited', updated_at = now() \
                     WHERE id = $1 \
                     RETURNING id, room_id, author_id, recipient_id, body, attachment_url, status, created_at, updated_at",
                )
                .bind(message_id)
                .bind(&new_body)
                .fetch_optional(pool)
                .await
                .context("failed to apply message edit")?;

                row.map(ChatMessage::try_from).transpose()
            }
            Self::Memory(state) => {
                let mut guard = state.write().await;
                Ok(guard.messages.get_mut(&message_id).map(|message| {
                    message.body = new_body;
                    message.status = MessageStatus::Edited;
                    message.updated_at = Utc::now();
                    message.clone()
                }))
            }
        }
    }

    /// Soft-delete a message: the row is retained with status `deleted` and
    /// disappears from history replay.
    pub async fn mark_deleted(&self, message_id: i64) -> Result<Option<ChatMessage>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, MessageRow>(
                    "UPDATE chat_messages \
                     SET status = 'deleted', updated_at = now() \
                     WHERE id = $1 \
                     RETURNING id, room_id, author_id, recipient_id, body, attachment_url, status, created_at, updated_at",
                )
                .bind(message_id)
                .fetch_optional(pool)
                .await
                .context("failed to soft-delete chat message")?;

                row.map(ChatMessage::try_from).transpose()
            }
            Self::Memory(state) => {
                let mut guard = state.write().await;
                Ok(guard.messages.get_mut(&message_id).map(|message| {
                    message.status = MessageStatus::Deleted;
                    message.updated_at = Utc::now();
                    message.clone()
                }))
            }
        }
    }

    /// Undeleted messages in a room with `id > after_id`, ascending by
    /// creation time, capped at `limit` rows.
    pub async fn history(
        &self,
        room_id: i64,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<ChatMessage>> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, MessageRow>(
                    "SELECT id, room_id, author_id, recipient_id, body, attachment_url, status, created_at, updated_at \
                     FROM chat_messages \
                     WHERE room_id = $1 AND id > $2 AND status <> 'deleted' \
                     ORDER BY created_at ASC, id ASC \
                     LIMIT $3",
                )
                .bind(room_id)
                .bind(after_id)
                .bind(limit)
                .fetch_all(pool)
                .await
                .context("failed to load message history")?;

                rows.into_iter().map(ChatMessage::try_from).collect()
            }
            Self::Memory(state) => {
                let guard = state.read().await;
                let mut messages: Vec<ChatMessage> = guard
                    .messages
                    .values()
                    .filter(|message| {
                        message.room_id == room_id
                            && message.id > after_id
                            && !message.status.is_deleted()
                    })
                    .cloned()
                    .collect();
                messages.sort_by(|a, b| {
                    a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
                });
                messages.truncate(limit.max(0) as usize);
                Ok(messages)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryChatState::default())))
    }

    #[cfg(test)]
    pub(crate) async fn deactivate_room_for_tests(&self, slug: &str) {
        if let Self::Memory(state) = self {
            if let Some(room) = state.write().await.rooms.get_mut(slug) {
                room.is_active = false;
            }
        }
    }
}
