//! Identity asserted by the authenticating gateway in front of the API.
//!
//! The gateway sets `X-User-Id` / `X-User-Name` on every request it lets
//! through. Browsers cannot set headers on a WebSocket upgrade, so the
//! upgrade request may carry `userId` / `userName` query parameters instead.

use axum::extract::{FromRequestParts, Query};
use axum::http::header::UPGRADE;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use serde::Deserialize;

use cohort_shared::UserId;

use crate::api::AppState;
use crate::error::ServerError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// The authenticated caller. Extracting it records the user and, when
/// configured, enrolls them in the community.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityQuery {
    user_id: Option<String>,
    user_name: Option<String>,
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?;
    let value = String::from_utf8_lossy(value.as_bytes()).trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn identify(parts: &Parts) -> Option<CurrentUser> {
    if let Some(id) = header_value(&parts.headers, USER_ID_HEADER) {
        let name = header_value(&parts.headers, USER_NAME_HEADER).unwrap_or_else(|| id.clone());
        return Some(CurrentUser { id: UserId::new(id), name });
    }

    if !is_websocket_upgrade(&parts.headers) {
        return None;
    }
    let Query(query) = Query::<IdentityQuery>::try_from_uri(&parts.uri).ok()?;
    let id = query.user_id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())?;
    let name = query
        .user_name
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| id.clone());
    Some(CurrentUser { id: UserId::new(id), name })
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = identify(parts).ok_or(ServerError::Unauthorized)?;
        state
            .chat
            .register_user(&user.id, &user.name, state.config.auto_join_community)?;
        Ok(user)
    }
}
