use parley_common::protocol::ws::{close_code, decode_client_event, ClientEvent, ServerEvent};
use serde_json::Value;

#[test]
fn outbound_frame_shapes_match_contract() {
    let samples = [
        (
            ServerEvent::handshake_complete(7, "chat-3-7"),
            "handshake_complete",
            &["type", "status", "user_id", "room_name"][..],
        ),
        (
            ServerEvent::HandshakeFailed { error: "invalid token".to_string() },
            "handshake_failed",
            &["type", "error"][..],
        ),
        (
            ServerEvent::ChatMessage {
                message: "hi".to_string(),
                sender: "alice".to_string(),
                author_id: 3,
                timestamp: "2026-08-06T00:00:00+00:00".to_string(),
                id: 12,
                attachment_url: Some("https://cdn.example/img.png".to_string()),
            },
            "chat_message",
            &["type", "message", "sender", "author_id", "timestamp", "id", "attachment_url"][..],
        ),
        (
            ServerEvent::MessageEdited {
                message_id: 12,
                new_content: "hi there".to_string(),
                sender: "alice".to_string(),
                date_updated: "2026-08-06T00:01:00+00:00".to_string(),
            },
            "message_edited",
            &["type", "message_id", "new_content", "sender", "date_updated"][..],
        ),
        (ServerEvent::EditSuccess { message_id: 12 }, "edit_success", &["type", "message_id"][..]),
        (
            ServerEvent::MessageDeleted { message_id: 12, sender: "alice".to_string() },
            "message_deleted",
            &["type", "message_id", "sender"][..],
        ),
        (ServerEvent::error("failed to process message"), "error", &["type", "message"][..]),
        (ServerEvent::Pong { message: "pong".to_string() }, "pong", &["type", "message"][..]),
    ];

    for (event, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(event).expect("server event should serialize");
        assert_eq!(value["type"], expected_type);
        for key in expected_keys {
            assert!(
                value.get(key).is_some(),
                "serialized `{expected_type}` frame must include `{key}`",
            );
        }
    }
}

#[test]
fn inbound_frame_shapes_match_contract() {
    let samples = [
        (ClientEvent::Ping, "ping"),
        (
            ClientEvent::ChatMessage { message: "hi".to_string(), attachment_url: None },
            "chat_message",
        ),
        (ClientEvent::EditMessage { message_id: 4, new_content: "hi!".to_string() }, "edit_message"),
        (ClientEvent::DeleteMessage { message_id: 4 }, "delete_message"),
    ];

    for (event, expected_type) in samples {
        let value = serde_json::to_value(&event).expect("client event should serialize");
        assert_eq!(value["type"], expected_type);
        let raw = value.to_string();
        let decoded = decode_client_event(&raw).expect("round trip should decode");
        assert_eq!(decoded, event);
    }
}

#[test]
fn handshake_complete_reports_success_status() {
    let value = serde_json::to_value(ServerEvent::handshake_complete(3, "chat-3-7"))
        .expect("event should serialize");
    assert_eq!(value["status"], "success");
    assert_eq!(value["user_id"], 3);
    assert_eq!(value["room_name"], "chat-3-7");
}

#[test]
fn optional_fields_are_omitted_when_absent() {
    let event = ServerEvent::ChatMessage {
        message: "hi".to_string(),
        sender: "alice".to_string(),
        author_id: 3,
        timestamp: "2026-08-06T00:00:00+00:00".to_string(),
        id: 12,
        attachment_url: None,
    };
    let value = serde_json::to_value(event).expect("event should serialize");
    assert!(!object_keys(&value).contains(&"attachment_url".to_string()));
}

#[test]
fn close_codes_stay_in_the_application_range() {
    for code in [
        close_code::UNAUTHORIZED,
        close_code::FORBIDDEN,
        close_code::NOT_FOUND,
        close_code::SERVER_ERROR,
    ] {
        assert!((4000..5000).contains(&code), "close code {code} must be in 4000-4999");
    }
    assert_eq!(close_code::UNAUTHORIZED, 4401);
    assert_eq!(close_code::FORBIDDEN, 4403);
    assert_eq!(close_code::NOT_FOUND, 4404);
    assert_eq!(close_code::SERVER_ERROR, 4500);
}

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys =
        value.as_object().expect("value should be an object").keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
}
