//! Axum routes for generation, downloads and per-user views

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use shorui_core::filename::DOCUMENT_MIME;
use shorui_core::{GenerationRequest, SessionId, ShoruiError};
use shorui_orchestrator::{GenerationCoordinator, UsageReport};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::api::{ApiError, GenerateBody, GenerateResponse, SessionView, UserHeader};

/// Shared application state
pub struct AppState {
    pub coordinator: GenerationCoordinator,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/generate", post(generate))
        .route("/api/usage", get(usage))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/health", get(health))
        .route("/documents/:filename", get(download))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped
pub async fn serve(state: SharedState, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Shorui listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// POST /api/generate
pub async fn generate(
    State(app): State<SharedState>,
    UserHeader(user_id): UserHeader,
    Json(body): Json<GenerateBody>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let outcome = app
        .coordinator
        .generate(GenerationRequest::new(user_id, body.topic))
        .await
        .map_err(|e| ApiError::generation(&e))?;

    Ok(Json(GenerateResponse::from(&outcome)))
}

/// GET /documents/:filename - streams the artifact as an attachment
pub async fn download(
    State(app): State<SharedState>,
    UserHeader(_user_id): UserHeader,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let (file, size) = app
        .coordinator
        .download(&filename)
        .await
        .map_err(|e| ApiError::lookup(&e))?;

    // validate_filename already refused quotes and separators
    let disposition = format!("attachment; filename=\"{}\"", filename);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, DOCUMENT_MIME)
        .header(header::CONTENT_LENGTH, size)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| {
            tracing::warn!("Could not build download response: {}", e);
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read document")
        })
}

/// GET /api/usage
pub async fn usage(
    State(app): State<SharedState>,
    UserHeader(user_id): UserHeader,
) -> Result<Json<UsageReport>, ApiError> {
    app.coordinator
        .usage(&user_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::internal(&e))
}

/// GET /api/sessions - newest first
pub async fn list_sessions(
    State(app): State<SharedState>,
    UserHeader(user_id): UserHeader,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let sessions = app
        .coordinator
        .history(&user_id)
        .await
        .map_err(|e| ApiError::internal(&e))?;

    Ok(Json(sessions.into_iter().map(SessionView::from).collect()))
}

/// GET /api/sessions/:id
pub async fn get_session(
    State(app): State<SharedState>,
    UserHeader(user_id): UserHeader,
    Path(id): Path<SessionId>,
) -> Result<Json<SessionView>, ApiError> {
    match app.coordinator.session(&user_id, id).await {
        Ok(session) => Ok(Json(session.into())),
        Err(ShoruiError::NotFound(_)) => {
            Err(ApiError::new(StatusCode::NOT_FOUND, "Session not found"))
        }
        Err(e) => Err(ApiError::internal(&e)),
    }
}

/// GET /api/health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "shorui"
    }))
}
