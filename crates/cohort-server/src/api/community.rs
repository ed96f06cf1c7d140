use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};

use cohort_shared::UserId;
use cohort_store::Community;

use super::{success, AppState, Success};
use crate::error::ServerError;
use crate::identity::CurrentUser;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/community", get(get_community).post(create_community))
        .route("/community/join", post(join_community))
        .route("/community/admins", post(add_admin))
}

#[derive(Deserialize)]
struct CreateCommunityRequest {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UserRequest {
    pub user_id: UserId,
}

#[derive(Serialize)]
struct JoinResponse {
    joined: bool,
}

async fn create_community(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateCommunityRequest>,
) -> Result<(StatusCode, Json<Community>), ServerError> {
    let community = state
        .chat
        .create_community(&user.id, &req.name, &req.description)
        .await?;
    Ok((StatusCode::CREATED, Json(community)))
}

async fn get_community(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Community>, ServerError> {
    Ok(Json(state.chat.get_community(&user.id)?))
}

async fn join_community(State(state): State<AppState>, user: CurrentUser) -> Result<Json<JoinResponse>, ServerError> {
    let joined = state.chat.join_community(&user.id).await?;
    Ok(Json(JoinResponse { joined }))
}

async fn add_admin(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<UserRequest>,
) -> Result<Json<Success>, ServerError> {
    state.chat.add_community_admin(&user.id, &req.user_id).await?;
    Ok(success())
}
