//! WebSocket endpoint bridging a client to the hub.
//!
//! Every frame in either direction is a JSON text frame
//! `{"event": name, "data": payload}`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use cohort_chat::{Chat, ClientEvent, ConnectionId, ServerEvent};
use cohort_shared::UserId;

use crate::api::AppState;
use crate::identity::CurrentUser;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>, user: CurrentUser) -> impl IntoResponse {
    debug!(user = %user.id, "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state.chat, user.id))
}

async fn handle_socket(socket: WebSocket, chat: Chat, user: UserId) {
    let (conn, mut events) = chat.connect(&user).await;
    let (mut sender, mut receiver) = socket.split();
    debug!(conn = %conn, user = %user, "WebSocket connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let json = match serde_json::to_string(&*event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(conn = %conn, event = event.name(), error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let Some(reply) = apply_frame(&chat, conn, &user, text.as_str()).await else {
                            continue;
                        };
                        let Ok(json) = serde_json::to_string(&reply) else { continue };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(conn = %conn, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    chat.disconnect(conn).await;
    debug!(conn = %conn, user = %user, "WebSocket disconnected");
}

/// Apply one client frame. Returns the `error` event to send back when the
/// frame is malformed or refused.
async fn apply_frame(chat: &Chat, conn: ConnectionId, user: &UserId, text: &str) -> Option<ServerEvent> {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(conn = %conn, error = %e, "Rejected malformed frame");
            return Some(ServerEvent::Error {
                message: format!("Malformed frame: {e}"),
            });
        }
    };

    match chat.handle_client_event(conn, user, event).await {
        Ok(()) => None,
        Err(e) => {
            warn!(conn = %conn, user = %user, error = %e, "Rejected frame");
            Some(ServerEvent::Error { message: e.to_string() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_chat::ChannelKey;
    use cohort_store::Database;

    async fn chat_with_group() -> (Chat, UserId, String) {
        let chat = Chat::new(Database::open_in_memory().unwrap());
        let admin = UserId::new("admin");
        chat.register_user(&admin, "Admin", false).unwrap();
        chat.create_community(&admin, "School", "").await.unwrap();
        let group = chat.create_group(&admin, "General", "").await.unwrap();
        (chat, admin, group.id.to_string())
    }

    #[tokio::test]
    async fn join_frame_subscribes_connection() {
        let (chat, admin, group) = chat_with_group().await;
        let (conn, _rx) = chat.connect(&admin).await;

        let frame = format!(r#"{{"event":"joinGroup","data":{{"groupId":"{group}"}}}}"#);
        assert!(apply_frame(&chat, conn, &admin, &frame).await.is_none());
        let key = ChannelKey::Group(group.parse().unwrap());
        assert!(chat.hub().is_subscribed(conn, &key).await);

        assert!(apply_frame(&chat, conn, &admin, r#"{"event":"joinUser"}"#).await.is_none());
    }

    #[tokio::test]
    async fn malformed_and_refused_frames_get_error_replies() {
        let (chat, _admin, group) = chat_with_group().await;
        let bob = UserId::new("bob");
        chat.register_user(&bob, "Bob", true).unwrap();
        let (conn, _rx) = chat.connect(&bob).await;

        let reply = apply_frame(&chat, conn, &bob, "not json").await;
        assert!(matches!(reply, Some(ServerEvent::Error { .. })));

        let frame = format!(r#"{{"event":"joinGroup","data":{{"groupId":"{group}"}}}}"#);
        match apply_frame(&chat, conn, &bob, &frame).await {
            Some(ServerEvent::Error { message }) => assert!(message.starts_with("Forbidden")),
            other => panic!("unexpected reply {other:?}"),
        }

        let frame = format!(r#"{{"event":"typing","data":{{"groupId":"{group}"}}}}"#);
        assert!(apply_frame(&chat, conn, &bob, &frame).await.is_some());
    }
}
