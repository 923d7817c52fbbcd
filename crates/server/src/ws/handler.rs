// The chat session handler: one task per socket connection.
//
// Connect sequence: authenticate the ambient session, check the
// anti-forgery token, resolve the counterpart and room, confirm the
// handshake, replay history, then join the room registry. While active,
// inbound events are handled strictly in arrival order; failures inside a
// single event are reported to the sender and never terminate the
// connection. The session leaves the registry before its task returns.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use parley_common::protocol::ws::{decode_client_event, ClientEvent, ServerEvent};
use parley_common::types::{room_slug, ChatMessage, ChatRoom, MAX_MESSAGE_CHARS};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::authz;
use super::protocol::{close_with_code, send_server_event};
use crate::auth::{Principal, SessionAuthenticator};
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ChatError,
    ErrorCode,
};
use crate::metrics;
use crate::registry::RoomRegistry;
use crate::store::ChatStore;

/// Maximum history rows replayed on connect.
pub(crate) const HISTORY_PAGE_LIMIT: i64 = 50;

/// Upper bound on a single websocket frame.
pub(crate) const MAX_FRAME_BYTES: usize = 65_536;

#[derive(Clone)]
pub struct ChatRouterState {
    pub(crate) store: ChatStore,
    pub(crate) authenticator: SessionAuthenticator,
    pub(crate) registry: Arc<RoomRegistry>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    token: Option<String>,
    last_id: Option<i64>,
}

pub fn router(
    store: ChatStore,
    authenticator: SessionAuthenticator,
    registry: Arc<RoomRegistry>,
) -> Router {
    let state = ChatRouterState { store, authenticator, registry };

    Router::new()
        .route("/ws/chat/{room_name}/{receiver_id}", get(ws_upgrade))
        .with_state(state)
}

pub async fn ws_upgrade(
    Path((room_name, receiver_id)): Path<(String, String)>,
    Query(query): Query<ConnectQuery>,
    State(state): State<ChatRouterState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Mirrors the route constraint of the HTTP layer: a non-numeric
    // receiver segment is a 404, not a connection attempt.
    let Ok(receiver_id) = receiver_id.parse::<i64>() else {
        return ChatError::from_code(ErrorCode::NotFound).into_response();
    };

    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_FRAME_BYTES).on_upgrade(move |socket| async move {
        with_request_id_scope(
            request_id,
            handle_socket(state, room_name, receiver_id, query, headers, socket),
        )
        .await;
    })
}

async fn handle_socket(
    state: ChatRouterState,
    room_name: String,
    receiver_id: i64,
    query: ConnectQuery,
    headers: HeaderMap,
    mut socket: WebSocket,
) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());

    let established = match establish(&state, &room_name, receiver_id, &query, &headers).await {
        Ok(established) => established,
        Err(rejection) => {
            warn!(
                request_id = %request_id,
                room_name = %room_name,
                close_code = rejection.code.close_code(),
                reason = %rejection.error,
                "chat connection rejected"
            );
            let _ = send_server_event(
                &mut socket,
                &ServerEvent::HandshakeFailed { error: rejection.error },
            )
            .await;
            close_with_code(&mut socket, rejection.code.close_code(), "handshake failed").await;
            return;
        }
    };

    let Established { principal, counterpart, room, history } = established;

    // Join before confirming the handshake: once the client sees
    // handshake_complete it is already a room member. Live events arriving
    // while history is still streaming queue up on the outbound channel
    // and are delivered after it.
    let connection_id = Uuid::new_v4();
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<ServerEvent>();
    state.registry.join(&room.slug, connection_id, outbound_sender).await;
    metrics::session_connected();

    info!(
        request_id = %request_id,
        user_id = principal.user_id,
        room = %room.slug,
        "chat session open"
    );

    serve_session(&state, &principal, &counterpart, &room, &history, &mut outbound_receiver, &mut socket)
        .await;

    // Deregister before the task returns: once leave() completes no
    // subsequent broadcast can observe this session.
    state.registry.leave(&room.slug, connection_id).await;
    metrics::session_disconnected();

    info!(
        request_id = %request_id,
        user_id = principal.user_id,
        room = %room.slug,
        "chat session closed"
    );
}

/// Confirm the handshake, stream history, then pump the session until the
/// socket or the outbound channel closes.
async fn serve_session(
    state: &ChatRouterState,
    principal: &Principal,
    counterpart: &Principal,
    room: &ChatRoom,
    history: &[ChatMessage],
    outbound_receiver: &mut mpsc::UnboundedReceiver<ServerEvent>,
    socket: &mut WebSocket,
) {
    let handshake = ServerEvent::handshake_complete(principal.user_id, &room.slug);
    if send_server_event(socket, &handshake).await.is_err() {
        return;
    }

    for message in history {
        let sender = if message.author_id == principal.user_id {
            &principal.username
        } else {
            &counterpart.username
        };
        if send_server_event(socket, &chat_message_event(message, sender)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(event) => {
                        if send_server_event(socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw)) => {
                        let dispatch = dispatch_text_frame(
                            state,
                            principal,
                            counterpart,
                            room,
                            socket,
                            raw.as_str(),
                        )
                        .await;
                        if dispatch.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }
}

struct Established {
    principal: Principal,
    counterpart: Principal,
    room: ChatRoom,
    history: Vec<ChatMessage>,
}

struct ConnectReject {
    code: ErrorCode,
    error: String,
}

impl ConnectReject {
    fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self { code, error: error.into() }
    }

    fn server_error() -> Self {
        Self::new(ErrorCode::InternalError, ErrorCode::InternalError.default_message())
    }
}

async fn establish(
    state: &ChatRouterState,
    room_name: &str,
    receiver_id: i64,
    query: &ConnectQuery,
    headers: &HeaderMap,
) -> Result<Established, ConnectReject> {
    let session = match state.authenticator.authenticate(headers).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return Err(ConnectReject::new(ErrorCode::AuthRequired, "authentication required"))
        }
        Err(failure) => {
            error!(error = ?failure, "failed to resolve ambient session");
            return Err(ConnectReject::server_error());
        }
    };

    if !session.csrf_matches(query.token.as_deref()) {
        return Err(ConnectReject::new(ErrorCode::AuthForbidden, "invalid anti-forgery token"));
    }

    let principal = session.principal;

    if receiver_id == principal.user_id {
        return Err(ConnectReject::new(ErrorCode::NotFound, "cannot open a chat with yourself"));
    }

    let counterpart = match state.authenticator.principal_by_id(receiver_id).await {
        Ok(Some(counterpart)) => counterpart,
        Ok(None) => return Err(ConnectReject::new(ErrorCode::NotFound, "receiver not found")),
        Err(failure) => {
            error!(error = ?failure, receiver_id, "failed to resolve counterpart");
            return Err(ConnectReject::server_error());
        }
    };

    let slug = room_slug(principal.user_id, counterpart.user_id);
    if room_name != slug {
        return Err(ConnectReject::new(ErrorCode::NotFound, "room not found"));
    }

    let room = match state
        .store
        .get_or_create_room(&slug, principal.user_id, counterpart.user_id)
        .await
    {
        Ok(Some(room)) => room,
        Ok(None) => return Err(ConnectReject::new(ErrorCode::NotFound, "room not found")),
        Err(failure) => {
            error!(error = ?failure, room = %slug, "failed to resolve chat room");
            return Err(ConnectReject::server_error());
        }
    };

    let after_id = query.last_id.unwrap_or(0);
    let history = match state.store.history(room.id, after_id, HISTORY_PAGE_LIMIT).await {
        Ok(history) => history,
        Err(failure) => {
            error!(error = ?failure, room = %slug, "failed to load message history");
            return Err(ConnectReject::server_error());
        }
    };

    Ok(Established { principal, counterpart, room, history })
}

/// Handle one inbound text frame. `Err(())` means the socket itself failed
/// and the connection loop should stop; every application-level failure is
/// reported to the sender and returns `Ok`.
async fn dispatch_text_frame(
    state: &ChatRouterState,
    principal: &Principal,
    counterpart: &Principal,
    room: &ChatRoom,
    socket: &mut WebSocket,
    raw: &str,
) -> Result<(), ()> {
    let event = match decode_client_event(raw) {
        Ok(event) => event,
        Err(_) => {
            metrics::record_ws_event("invalid", true, 0);
            return send_server_event(socket, &ServerEvent::error("failed to process message"))
                .await;
        }
    };

    match event {
        ClientEvent::Ping => {
            let started_at = Instant::now();
            let result =
                send_server_event(socket, &ServerEvent::Pong { message: "pong".to_string() }).await;
            metrics::record_ws_event("ping", false, started_at.elapsed().as_millis() as u64);
            result
        }
        ClientEvent::ChatMessage { message, attachment_url } => {
            let started_at = Instant::now();
            match handle_chat_message(state, principal, counterpart, room, message, attachment_url)
                .await
            {
                Ok(Some(event)) => {
                    metrics::record_ws_event(
                        "chat_message",
                        false,
                        started_at.elapsed().as_millis() as u64,
                    );
                    state.registry.broadcast(&room.slug, event).await;
                    Ok(())
                }
                Ok(None) => {
                    metrics::record_ws_event(
                        "chat_message",
                        false,
                        started_at.elapsed().as_millis() as u64,
                    );
                    Ok(())
                }
                Err(event) => {
                    metrics::record_ws_event(
                        "chat_message",
                        true,
                        started_at.elapsed().as_millis() as u64,
                    );
                    send_server_event(socket, &event).await
                }
            }
        }
        ClientEvent::EditMessage { message_id, new_content } => {
            let started_at = Instant::now();
            match handle_edit_message(state, principal, room, message_id, new_content).await {
                Ok(outcome) => {
                    metrics::record_ws_event(
                        "edit_message",
                        false,
                        started_at.elapsed().as_millis() as u64,
                    );
                    send_server_event(socket, &outcome.ack).await?;
                    state.registry.broadcast(&room.slug, outcome.broadcast).await;
                    Ok(())
                }
                Err(event) => {
                    metrics::record_ws_event(
                        "edit_message",
                        true,
                        started_at.elapsed().as_millis() as u64,
                    );
                    send_server_event(socket, &event).await
                }
            }
        }
        ClientEvent::DeleteMessage { message_id } => {
            let started_at = Instant::now();
            match handle_delete_message(state, principal, room, message_id).await {
                Ok(event) => {
                    metrics::record_ws_event(
                        "delete_message",
                        false,
                        started_at.elapsed().as_millis() as u64,
                    );
                    state.registry.broadcast(&room.slug, event).await;
                    Ok(())
                }
                Err(event) => {
                    metrics::record_ws_event(
                        "delete_message",
                        true,
                        started_at.elapsed().as_millis() as u64,
                    );
                    send_server_event(socket, &event).await
                }
            }
        }
    }
}

/// Persist a new message and build the room broadcast.
///
/// `Ok(None)` is the silent no-op for whitespace-only sends.
async fn handle_chat_message(
    state: &ChatRouterState,
    principal: &Principal,
    counterpart: &Principal,
    room: &ChatRoom,
    message: String,
    attachment_url: Option<String>,
) -> Result<Option<ServerEvent>, ServerEvent> {
    let body = message.trim();
    if body.is_empty() {
        return Ok(None);
    }
    if body.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ServerEvent::error(format!(
            "message exceeds the {MAX_MESSAGE_CHARS} character limit"
        )));
    }

    match state
        .store
        .create_message(
            room,
            principal.user_id,
            counterpart.user_id,
            body.to_string(),
            attachment_url,
        )
        .await
    {
        Ok(stored) => Ok(Some(chat_message_event(&stored, &principal.username))),
        Err(failure) => {
            error!(
                error = ?failure,
                request_id = current_request_id().as_deref().unwrap_or(""),
                room = %room.slug,
                user_id = principal.user_id,
                "failed to persist chat message"
            );
            Err(ServerEvent::error("failed to process message"))
        }
    }
}

#[derive(Debug)]
struct EditOutcome {
    ack: ServerEvent,
    broadcast: ServerEvent,
}

async fn handle_edit_message(
    state: &ChatRouterState,
    principal: &Principal,
    room: &ChatRoom,
    message_id: i64,
    new_content: String,
) -> Result<EditOutcome, ServerEvent> {
    let body = new_content.trim();
    if body.is_empty() {
        return Err(ServerEvent::error("edited message must not be empty"));
    }
    if body.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ServerEvent::error(format!(
            "message exceeds the {MAX_MESSAGE_CHARS} character limit"
        )));
    }

    let message = fetch_message_for_update(state, room, principal, message_id).await?;
    if let Err(denied) = authz::evaluate(authz::EDIT_CHECKS, principal, room, &message) {
        return Err(ServerEvent::error(denied.reason()));
    }

    match state.store.apply_edit(message_id, body.to_string()).await {
        Ok(Some(updated)) => Ok(EditOutcome {
            ack: ServerEvent::EditSuccess { message_id: updated.id },
            broadcast: ServerEvent::MessageEdited {
                message_id: updated.id,
                new_content: updated.body,
                sender: principal.username.clone(),
                date_updated: updated.updated_at.to_rfc3339(),
            },
        }),
        Ok(None) => Err(ServerEvent::error("message not found")),
        Err(failure) => {
            error!(
                error = ?failure,
                room = %room.slug,
                user_id = principal.user_id,
                message_id,
                "failed to apply message edit"
            );
            Err(ServerEvent::error("failed to process message"))
        }
    }
}

async fn handle_delete_message(
    state: &ChatRouterState,
    principal: &Principal,
    room: &ChatRoom,
    message_id: i64,
) -> Result<ServerEvent, ServerEvent> {
    let message = fetch_message_for_update(state, room, principal, message_id).await?;
    if let Err(denied) = authz::evaluate(authz::DELETE_CHECKS, principal, room, &message) {
        return Err(ServerEvent::error(denied.reason()));
    }

    match state.store.mark_deleted(message_id).await {
        Ok(Some(deleted)) => Ok(ServerEvent::MessageDeleted {
            message_id: deleted.id,
            sender: principal.username.clone(),
        }),
        Ok(None) => Err(ServerEvent::error("message not found")),
        Err(failure) => {
            error!(
                error = ?failure,
                room = %room.slug,
                user_id = principal.user_id,
                message_id,
                "failed to soft-delete message"
            );
            Err(ServerEvent::error("failed to process message"))
        }
    }
}

/// Fetch with no status filtering so the authorization chain can run
/// against soft-deleted rows too.
async fn fetch_message_for_update(
    state: &ChatRouterState,
    room: &ChatRoom,
    principal: &Principal,
    message_id: i64,
) -> Result<ChatMessage, ServerEvent> {
    match state.store.message_by_id(message_id).await {
        Ok(Some(message)) => Ok(message),
        Ok(None) => Err(ServerEvent::error("message not found")),
        Err(failure) => {
            error!(
                error = ?failure,
                room = %room.slug,
                user_id = principal.user_id,
                message_id,
                "failed to fetch message"
            );
            Err(ServerEvent::error("failed to process message"))
        }
    }
}

fn chat_message_event(message: &ChatMessage, sender: &str) -> ServerEvent {
    ServerEvent::ChatMessage {
        message: message.body.clone(),
        sender: sender.to_string(),
        author_id: message.author_id,
        timestamp: message.created_at.to_rfc3339(),
        id: message.id,
        attachment_url: message.attachment_url.clone(),
    }
}
