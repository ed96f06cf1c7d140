use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use cohort_shared::report::{ReportAction, ReportReason};
use cohort_shared::{MessageId, ReportId};
use cohort_store::{Report, ReportDetails};

use super::{success, AppState, Success};
use crate::error::ServerError;
use crate::identity::CurrentUser;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/reports", get(list_reports).post(submit_report))
        .route("/reports/{report_id}/warn", post(warn_user))
        .route("/reports/{report_id}/dismiss", post(dismiss))
        .route("/reports/{report_id}/message", delete(delete_message))
        .route("/reports/{report_id}/user", delete(remove_user))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportRequest {
    message_id: MessageId,
    reason: ReportReason,
}

async fn submit_report(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<ReportRequest>,
) -> Result<(StatusCode, Json<Report>), ServerError> {
    let report = state.chat.submit_report(&user.id, req.message_id, req.reason).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn list_reports(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Vec<ReportDetails>>, ServerError> {
    Ok(Json(state.chat.list_reports(&user.id)?))
}

async fn resolve(state: &AppState, user: &CurrentUser, report_id: ReportId, action: ReportAction) -> Result<Json<Success>, ServerError> {
    state.chat.resolve_report(&user.id, report_id, action).await?;
    Ok(success())
}

async fn warn_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(report_id): Path<ReportId>,
) -> Result<Json<Success>, ServerError> {
    resolve(&state, &user, report_id, ReportAction::Warn).await
}

async fn dismiss(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(report_id): Path<ReportId>,
) -> Result<Json<Success>, ServerError> {
    resolve(&state, &user, report_id, ReportAction::Dismiss).await
}

async fn delete_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(report_id): Path<ReportId>,
) -> Result<Json<Success>, ServerError> {
    resolve(&state, &user, report_id, ReportAction::DeleteMessage).await
}

async fn remove_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(report_id): Path<ReportId>,
) -> Result<Json<Success>, ServerError> {
    resolve(&state, &user, report_id, ReportAction::RemoveUser).await
}
