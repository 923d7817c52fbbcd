// Capability checks for privileged message mutations.
//
// Each check is a plain predicate returning a denial reason; a chain is
// evaluated in order and stops at the first denial. The handler runs the
// relevant chain before any edit or delete touches the store.

use parley_common::types::{ChatMessage, ChatRoom};

use crate::auth::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deny {
    ForeignRoom,
    NotAuthor,
    AlreadyDeleted,
}

impl Deny {
    pub const fn reason(self) -> &'static str {
        match self {
            Self::ForeignRoom => "message does not belong to this room",
            Self::NotAuthor => "only the author may modify a message",
            Self::AlreadyDeleted => "message has been deleted",
        }
    }
}

type Check = fn(&Principal, &ChatRoom, &ChatMessage) -> Option<Deny>;

/// Checks applied before an edit, in order.
pub const EDIT_CHECKS: &[Check] = &[in_this_room, authored_by_caller, not_deleted];

/// Checks applied before a delete. Deleting an already-deleted message is
/// idempotent, so the chain stops at authorship.
pub const DELETE_CHECKS: &[Check] = &[in_this_room, authored_by_caller];

pub fn evaluate(
    checks: &[Check],
    principal: &Principal,
    room: &ChatRoom,
    message: &ChatMessage,
) -> Result<(), Deny> {
    for check in checks {
        if let Some(denied) = check(principal, room, message) {
            return Err(denied);
        }
    }
    Ok(())
}

fn in_this_room(_: &Principal, room: &ChatRoom, message: &ChatMessage) -> Option<Deny> {
    (message.room_id != room.id).then_some(Deny::ForeignRoom)
}

fn authored_by_caller(principal: &Principal, _: &ChatRoom, message: &ChatMessage) -> Option<Deny> {
    (message.author_id != principal.user_id).then_some(Deny::NotAuthor)
}

fn not_deleted(_: &Principal, _: &ChatRoom, message: &ChatMessage) -> Option<Deny> {
    message.status.is_deleted().then_some(Deny::AlreadyDeleted)
}
