//! REST API.

mod community;
mod groups;
mod messages;
mod reports;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, Method},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use cohort_chat::Chat;

use crate::attachments::DiskAttachments;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::socket;

/// Multipart framing on top of the attachment itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub chat: Chat,
    pub attachments: Arc<DiskAttachments>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.attachments.max_size() + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health_check))
        .merge(community::routes())
        .merge(groups::routes())
        .merge(messages::routes())
        .merge(reports::routes())
        .route("/uploads/{name}", get(serve_upload))
        .route("/ws", get(socket::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let Some(origin) = &config.cors_origin else {
        return cors.allow_origin(Any);
    };
    match HeaderValue::from_str(origin) {
        Ok(value) => cors.allow_origin(AllowOrigin::exact(value)),
        Err(e) => {
            warn!(origin = %origin, error = %e, "Invalid CORS_ORIGIN, allowing any origin");
            cors.allow_origin(Any)
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Body returned by operations that have nothing else to report.
#[derive(Serialize)]
pub(crate) struct Success {
    success: bool,
}

pub(crate) fn success() -> Json<Success> {
    Json(Success { success: true })
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn serve_upload(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let (data, content_type) = state.attachments.open(&name).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], data))
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP API listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
