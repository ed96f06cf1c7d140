use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use cohort_chat::{Attachment, Draft};
use cohort_shared::{GroupId, MessageId};
use cohort_store::Message;

use super::{success, AppState, Success};
use crate::error::ServerError;
use crate::identity::CurrentUser;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/messages", post(send_message))
        .route("/messages/upload", post(upload_message))
        .route("/messages/group/{group_id}", get(list_messages))
        .route("/messages/thread/{message_id}", get(list_thread))
        .route("/messages/pinned/{group_id}", get(pinned))
        .route("/messages/clear/{group_id}", delete(clear_group))
        .route("/messages/{message_id}", delete(delete_message))
        .route("/messages/{message_id}/pin", post(toggle_pin))
        .route("/messages/{message_id}/react", post(react).delete(remove_reaction))
        .route("/messages/{message_id}/vote", post(vote))
        .route("/messages/{message_id}/attend", post(attend))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    group_id: GroupId,
    #[serde(flatten)]
    draft: Draft,
}

#[derive(Deserialize)]
struct HistoryQuery {
    before: Option<MessageId>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct EmojiRequest {
    emoji: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteRequest {
    option_index: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PinResponse {
    pinned_message: Option<Message>,
}

#[derive(Serialize)]
struct ClearResponse {
    deleted: usize,
}

async fn send_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<SendRequest>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let message = state.chat.send(&user.id, req.group_id, req.draft).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ServerError> {
    value
        .trim()
        .parse()
        .map_err(|_| ServerError::BadRequest(format!("Invalid '{name}' field")))
}

/// Multipart send: `file`, `groupId` and an optional `parentId`.
async fn upload_message(
    State(state): State<AppState>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let mut group_id: Option<GroupId> = None;
    let mut parent_id: Option<MessageId> = None;
    let mut file: Option<(String, String, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("file").to_string();
                let content_type = field.content_type().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                file = Some((file_name, content_type, data));
            }
            "groupId" | "parentId" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                if name == "groupId" {
                    group_id = Some(parse_field(&name, &text)?);
                } else if !text.trim().is_empty() {
                    parent_id = Some(parse_field(&name, &text)?);
                }
            }
            _ => {}
        }
    }

    let group_id = group_id.ok_or_else(|| ServerError::BadRequest("Missing 'groupId' field".to_string()))?;
    let (file_name, content_type, data) =
        file.ok_or_else(|| ServerError::BadRequest("Missing 'file' field in multipart form".to_string()))?;

    // Refuse before anything touches the upload directory.
    state.chat.authorize_post(&user.id, group_id, parent_id)?;
    let stored = state.attachments.store(&file_name, &content_type, &data).await?;
    info!(
        user = %user.id,
        group = %group_id,
        file = %stored.file_name,
        path = %stored.path,
        size = data.len(),
        "Attachment uploaded"
    );

    let draft = Draft {
        parent_id,
        attachment: Some(Attachment {
            path: stored.path,
            content_type: stored.content_type,
        }),
        ..Draft::default()
    };
    let message = state.chat.send(&user.id, group_id, draft).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn list_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(group_id): Path<GroupId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let limit = query.limit.unwrap_or(state.config.page_size);
    Ok(Json(state.chat.list_messages(&user.id, group_id, query.before, limit)?))
}

async fn list_thread(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(message_id): Path<MessageId>,
) -> Result<Json<Vec<Message>>, ServerError> {
    Ok(Json(state.chat.list_thread(&user.id, message_id)?))
}

async fn pinned(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(group_id): Path<GroupId>,
) -> Result<Json<Option<Message>>, ServerError> {
    Ok(Json(state.chat.pinned(&user.id, group_id)?))
}

async fn clear_group(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(group_id): Path<GroupId>,
) -> Result<Json<ClearResponse>, ServerError> {
    let deleted = state.chat.clear_group_messages(&user.id, group_id).await?;
    Ok(Json(ClearResponse { deleted }))
}

async fn delete_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(message_id): Path<MessageId>,
) -> Result<Json<Success>, ServerError> {
    state.chat.delete_message(&user.id, message_id).await?;
    Ok(success())
}

async fn toggle_pin(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(message_id): Path<MessageId>,
) -> Result<Json<PinResponse>, ServerError> {
    let pinned_message = state.chat.toggle_pin(&user.id, message_id).await?;
    Ok(Json(PinResponse { pinned_message }))
}

// Reaction, vote and RSVP toggles answer with the updated message.

fn updated(state: &AppState, user: &CurrentUser, message_id: MessageId) -> Result<Json<Message>, ServerError> {
    Ok(Json(state.chat.get_message(&user.id, message_id)?))
}

async fn react(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(message_id): Path<MessageId>,
    Json(req): Json<EmojiRequest>,
) -> Result<Json<Message>, ServerError> {
    state.chat.react(&user.id, message_id, &req.emoji).await?;
    updated(&state, &user, message_id)
}

async fn remove_reaction(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(message_id): Path<MessageId>,
    Json(req): Json<EmojiRequest>,
) -> Result<Json<Message>, ServerError> {
    state.chat.remove_reaction(&user.id, message_id, &req.emoji).await?;
    updated(&state, &user, message_id)
}

async fn vote(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(message_id): Path<MessageId>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<Message>, ServerError> {
    state.chat.vote_poll(&user.id, message_id, req.option_index).await?;
    updated(&state, &user, message_id)
}

async fn attend(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(message_id): Path<MessageId>,
) -> Result<Json<Message>, ServerError> {
    state.chat.join_event(&user.id, message_id).await?;
    updated(&state, &user, message_id)
}

#[cfg(test)]
mod tests {
    use crate::api::tests::{test_app, TestApp};
    use crate::identity::USER_ID_HEADER;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};

    async fn post_text(app: &TestApp, user: &str, group: &str, text: &str) -> Value {
        let (status, message) = app
            .call(Method::POST, "/messages", Some(user), Some(json!({"groupId": group, "content": text})))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{message}");
        message
    }

    #[tokio::test]
    async fn send_and_page_history() {
        let app = test_app().await;
        let group = app.seeded().await;

        let mut ids = Vec::new();
        for text in ["one", "two", "three"] {
            let message = post_text(&app, "admin", &group, text).await;
            ids.push(message["id"].as_str().unwrap().to_string());
        }

        let (status, page) = app
            .call(Method::GET, &format!("/messages/group/{group}?limit=2"), Some("admin"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let contents: Vec<_> = page.as_array().unwrap().iter().map(|m| m["content"].clone()).collect();
        assert_eq!(contents, vec![json!("two"), json!("three")]);

        let (_, older) = app
            .call(Method::GET, &format!("/messages/group/{group}?before={}", ids[1]), Some("admin"), None)
            .await;
        assert_eq!(older.as_array().unwrap().len(), 1);
        assert_eq!(older[0]["type"], "text");
        assert_eq!(older[0]["sender"]["name"], "Admin");
    }

    #[tokio::test]
    async fn non_members_cannot_post_or_read() {
        let app = test_app().await;
        let group = app.seeded().await;

        let (status, body) = app
            .call(Method::POST, "/messages", Some("bob"), Some(json!({"groupId": group, "content": "hi"})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].as_str().unwrap().starts_with("Forbidden"));

        let (status, _) = app
            .call(Method::GET, &format!("/messages/group/{group}"), Some("bob"), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn replies_pins_and_reactions() {
        let app = test_app().await;
        let group = app.seeded().await;
        let parent = post_text(&app, "admin", &group, "question").await;
        let parent_id = parent["id"].as_str().unwrap();

        let (status, reply) = app
            .call(
                Method::POST,
                "/messages",
                Some("admin"),
                Some(json!({"groupId": group, "content": "answer", "parentId": parent_id})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(reply["parentId"], parent_id);

        let (_, thread) = app
            .call(Method::GET, &format!("/messages/thread/{parent_id}"), Some("admin"), None)
            .await;
        assert_eq!(thread.as_array().unwrap().len(), 1);

        let (_, pin) = app
            .call(Method::POST, &format!("/messages/{parent_id}/pin"), Some("admin"), None)
            .await;
        assert_eq!(pin["pinnedMessage"]["id"], parent_id);
        let (_, pinned) = app
            .call(Method::GET, &format!("/messages/pinned/{group}"), Some("admin"), None)
            .await;
        assert_eq!(pinned["isPinned"], true);

        let react = format!("/messages/{parent_id}/react");
        let (_, body) = app
            .call(Method::POST, &react, Some("admin"), Some(json!({"emoji": "👍"})))
            .await;
        assert_eq!(body["reactions"], json!([{"emoji": "👍", "userId": "admin"}]));
        let (_, body) = app
            .call(Method::DELETE, &react, Some("admin"), Some(json!({"emoji": "👍"})))
            .await;
        assert_eq!(body["reactions"], json!([]));

        let reply_id = reply["id"].as_str().unwrap();
        let (status, _) = app
            .call(Method::DELETE, &format!("/messages/{reply_id}"), Some("admin"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (_, history) = app
            .call(Method::GET, &format!("/messages/group/{group}"), Some("admin"), None)
            .await;
        assert_eq!(history[0]["replyCount"], 0);
    }

    #[tokio::test]
    async fn polls_and_events() {
        let app = test_app().await;
        let group = app.seeded().await;

        let (status, poll) = app
            .call(
                Method::POST,
                "/messages",
                Some("admin"),
                Some(json!({
                    "groupId": group,
                    "type": "poll",
                    "pollData": {"question": "Lunch?", "options": [{"text": "Pizza"}, {"text": "Salad"}]}
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let poll_id = poll["id"].as_str().unwrap();

        let (status, data) = app
            .call(Method::POST, &format!("/messages/{poll_id}/vote"), Some("admin"), Some(json!({"optionIndex": 1})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data["pollData"]["options"][1]["votes"], json!(["admin"]));

        let (status, _) = app
            .call(Method::POST, &format!("/messages/{poll_id}/attend"), Some("admin"), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, event) = app
            .call(
                Method::POST,
                "/messages",
                Some("admin"),
                Some(json!({"groupId": group, "type": "event", "eventData": {"title": "Open day"}})),
            )
            .await;
        let event_id = event["id"].as_str().unwrap();
        let (_, data) = app
            .call(Method::POST, &format!("/messages/{event_id}/attend"), Some("admin"), None)
            .await;
        assert_eq!(data["eventData"]["attendees"], json!(["admin"]));
    }

    #[tokio::test]
    async fn clear_chat_is_admin_only() {
        let app = test_app().await;
        let group = app.seeded().await;
        post_text(&app, "admin", &group, "one").await;
        post_text(&app, "admin", &group, "two").await;

        let (status, _) = app
            .call(Method::DELETE, &format!("/messages/clear/{group}"), Some("bob"), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .call(Method::DELETE, &format!("/messages/clear/{group}"), Some("admin"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 2);
    }

    fn multipart_request(user: &str, group: &str, file_name: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let boundary = "cohort-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"groupId\"\r\n\r\n{group}\r\n").as_bytes(),
        );
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/messages/upload")
            .header(USER_ID_HEADER, user)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn upload_stores_file_and_posts_image() {
        let app = test_app().await;
        let group = app.seeded().await;

        let (status, message) = app
            .send(multipart_request("admin", &group, "cat.png", "image/png", b"not-really-a-png"))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{message}");
        assert_eq!(message["type"], "image");
        let path = message["content"].as_str().unwrap();
        assert!(path.starts_with("/uploads/") && path.ends_with(".png"));

        let resp = tower::ServiceExt::oneshot(
            app.router.clone(),
            Request::builder().uri(path).body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");

        let (status, message) = app
            .send(multipart_request("admin", &group, "notes.pdf", "application/pdf", b"%PDF"))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message["type"], "file");
    }

    #[tokio::test]
    async fn upload_over_limit_is_rejected() {
        let app = test_app().await;
        let group = app.seeded().await;
        let (status, _) = app
            .send(multipart_request("admin", &group, "big.bin", "application/octet-stream", &[7u8; 2048]))
            .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn refused_upload_leaves_nothing_on_disk() {
        let app = test_app().await;
        let group = app.seeded().await;
        app.call(Method::GET, "/community", Some("mallory"), None).await;

        let (status, body) = app
            .send(multipart_request("mallory", &group, "junk.txt", "text/plain", b"fill the disk"))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
        assert_eq!(std::fs::read_dir(app.uploads.path()).unwrap().count(), 0);

        let name = format!("{}.txt", blake3::hash(b"fill the disk").to_hex());
        let (status, _) = app.call(Method::GET, &format!("/uploads/{name}"), Some("admin"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
