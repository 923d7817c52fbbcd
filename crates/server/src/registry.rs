// In-memory room membership and fan-out.
//
// The registry is the only mutable structure shared across connection
// tasks. One instance is created at process start and handed to every
// connection through the router state; there is no persisted effect.

use std::collections::HashMap;

use parley_common::protocol::ws::ServerEvent;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::metrics;

/// Maps a room slug to the outbound channels of its live sessions.
///
/// The registry never owns a connection: it holds only the sender half of
/// each session's outbound channel, and dropping a membership entry does
/// not terminate the session task.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, HashMap<Uuid, mpsc::UnboundedSender<ServerEvent>>>>,
}

impl RoomRegistry {
    /// Register a session under a room key. Idempotent per connection: a
    /// second join with the same id leaves the existing entry untouched.
    pub async fn join(
        &self,
        room_slug: &str,
        connection_id: Uuid,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) {
        let mut guard = self.rooms.write().await;
        guard
            .entry(room_slug.to_string())
            .or_default()
            .entry(connection_id)
            .or_insert(sender);
    }

    /// Remove a session from a room. Once this returns, the session can no
    /// longer be observed by a subsequent broadcast snapshot. Empty room
    /// entries are dropped.
    pub async fn leave(&self, room_slug: &str, connection_id: Uuid) {
        let mut guard = self.rooms.write().await;
        if let Some(members) = guard.get_mut(room_slug) {
            members.remove(&connection_id);
            if members.is_empty() {
                guard.remove(room_slug);
            }
        }
    }

    /// Deliver `event` to every session registered under `room_slug` at the
    /// time of the call, including the originator. Delivery is
    /// fire-and-forget per member: a session whose receiver has already
    /// gone away is skipped without affecting the others.
    ///
    /// Returns the number of sessions the event was handed to.
    pub async fn broadcast(&self, room_slug: &str, event: ServerEvent) -> usize {
        let recipients: Vec<mpsc::UnboundedSender<ServerEvent>> = {
            let guard = self.rooms.read().await;
            match guard.get(room_slug) {
                Some(members) => members.values().cloned().collect(),
                None => Vec::new(),
            }
        };

        let mut sent_count = 0;
        for recipient in recipients {
            if recipient.send(event.clone()).is_ok() {
                sent_count += 1;
            }
        }

        metrics::add_broadcast_deliveries(sent_count as u64);
        sent_count
    }

    /// Number of live sessions currently joined to a room.
    pub async fn member_count(&self, room_slug: &str) -> usize {
        self.rooms.read().await.get(room_slug).map(HashMap::len).unwrap_or(0)
    }
}
