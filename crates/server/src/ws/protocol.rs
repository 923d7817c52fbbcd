use axum::extract::ws::{CloseFrame, Message, WebSocket};
use parley_common::protocol::ws::{encode_server_event, ServerEvent};

pub async fn send_server_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let encoded = encode_server_event(event).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

/// Close the socket with an application close code. Send failures are
/// ignored: the peer may already be gone.
pub async fn close_with_code(socket: &mut WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame { code, reason: reason.to_owned().into() })))
        .await;
}
