use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use cohort_shared::ChatError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Missing identity")]
    Unauthorized,

    #[error("Attachment not found")]
    AttachmentNotFound,

    #[error("Attachment too large: {size} bytes (max {max})")]
    AttachmentTooLarge { size: usize, max: usize },

    #[error("Attachment storage error: {0}")]
    AttachmentStorage(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Chat(err) => match err {
                ChatError::NotFound(_) => StatusCode::NOT_FOUND,
                ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
                ChatError::Conflict(_)
                | ChatError::AlreadyMember
                | ChatError::AnnouncementNotJoinable
                | ChatError::CannotRemoveAdmin => StatusCode::CONFLICT,
                ChatError::InvalidPayload(_) | ChatError::NotAPoll | ChatError::NotAnEvent => {
                    StatusCode::BAD_REQUEST
                }
                ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::AttachmentNotFound => StatusCode::NOT_FOUND,
            ServerError::AttachmentTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::AttachmentStorage(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
