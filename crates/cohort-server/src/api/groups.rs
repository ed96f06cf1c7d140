use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use cohort_chat::GroupView;
use cohort_shared::{GroupId, UserId};
use cohort_store::Group;

use super::community::UserRequest;
use super::{success, AppState, Success};
use crate::error::ServerError;
use crate::identity::CurrentUser;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/{group_id}", delete(delete_group))
        .route("/groups/{group_id}/request", post(request_join))
        .route("/groups/{group_id}/approve", post(approve))
        .route("/groups/{group_id}/reject", post(reject))
        .route("/groups/{group_id}/members", post(add_member))
        .route("/groups/{group_id}/members/{user_id}", delete(remove_member))
        .route("/groups/{group_id}/leave", post(leave_group))
        .route("/groups/{group_id}/read", post(mark_read))
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    name: String,
    #[serde(default)]
    description: String,
}

async fn list_groups(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Vec<GroupView>>, ServerError> {
    Ok(Json(state.chat.list_groups(&user.id)?))
}

async fn create_group(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Group>), ServerError> {
    let group = state.chat.create_group(&user.id, &req.name, &req.description).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn delete_group(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(group_id): Path<GroupId>,
) -> Result<Json<Success>, ServerError> {
    state.chat.delete_group(&user.id, group_id).await?;
    Ok(success())
}

async fn request_join(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(group_id): Path<GroupId>,
) -> Result<Json<Success>, ServerError> {
    state.chat.request_join(&user.id, group_id).await?;
    Ok(success())
}

async fn approve(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(group_id): Path<GroupId>,
    Json(req): Json<UserRequest>,
) -> Result<Json<Success>, ServerError> {
    state.chat.approve(&user.id, group_id, &req.user_id).await?;
    Ok(success())
}

async fn reject(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(group_id): Path<GroupId>,
    Json(req): Json<UserRequest>,
) -> Result<Json<Success>, ServerError> {
    state.chat.reject(&user.id, group_id, &req.user_id).await?;
    Ok(success())
}

async fn add_member(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(group_id): Path<GroupId>,
    Json(req): Json<UserRequest>,
) -> Result<Json<Success>, ServerError> {
    state.chat.add_member(&user.id, group_id, &req.user_id).await?;
    Ok(success())
}

async fn remove_member(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((group_id, target)): Path<(GroupId, UserId)>,
) -> Result<Json<Success>, ServerError> {
    state.chat.remove_member(&user.id, group_id, &target).await?;
    Ok(success())
}

async fn leave_group(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(group_id): Path<GroupId>,
) -> Result<Json<Success>, ServerError> {
    state.chat.leave_group(&user.id, group_id).await?;
    Ok(success())
}

async fn mark_read(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(group_id): Path<GroupId>,
) -> Result<Json<Success>, ServerError> {
    state.chat.mark_read(&user.id, group_id)?;
    Ok(success())
}
