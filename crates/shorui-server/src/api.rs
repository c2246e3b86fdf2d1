//! Request and response shapes for the HTTP API

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shorui_core::{
    GenerationSession, SessionId, SessionStatus, ShoruiError, GENERIC_FAILURE_MESSAGE,
};
use shorui_orchestrator::{download_url, GenerationOutcome};

/// Header carrying the caller's user id
pub const USER_HEADER: &str = "x-user-id";

/// Caller identity taken from [`USER_HEADER`]; missing or blank is a 401
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserHeader(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for UserHeader
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(|user| Self(user.to_string()))
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Missing user id"))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateBody {
    #[serde(default)]
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub success: bool,
    pub session_id: SessionId,
    pub filename: String,
    pub download_url: String,
    pub message: String,
}

impl From<&GenerationOutcome> for GenerateResponse {
    fn from(outcome: &GenerationOutcome) -> Self {
        Self {
            success: true,
            session_id: outcome.session.id,
            filename: outcome.session.generated_file.clone().unwrap_or_default(),
            download_url: outcome.download_url.clone(),
            message: "Document generated successfully".to_string(),
        }
    }
}

/// Session as shown to its owner; no server paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: SessionId,
    pub topic: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<GenerationSession> for SessionView {
    fn from(session: GenerationSession) -> Self {
        Self {
            id: session.id,
            download_url: session.generated_file.as_deref().map(download_url),
            filename: session.generated_file,
            topic: session.topic,
            status: session.status,
            failure: session.failure,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

/// `{success: false, error}` with a status code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Generation failures: validation 400, quota 429, anything else 500
    pub fn generation(err: &ShoruiError) -> Self {
        let status = match err {
            ShoruiError::Validation(_) => StatusCode::BAD_REQUEST,
            ShoruiError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.public_message())
    }

    /// Lookups by name or id: unsafe input 400, unknown 404
    pub fn lookup(err: &ShoruiError) -> Self {
        match err {
            ShoruiError::PathValidation(_) => Self::new(StatusCode::BAD_REQUEST, "Invalid filename"),
            ShoruiError::Validation(msg) => Self::new(StatusCode::BAD_REQUEST, msg.clone()),
            ShoruiError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.public_message()),
            _ => Self::internal(err),
        }
    }

    pub fn internal(err: &ShoruiError) -> Self {
        tracing::warn!("Request failed: {}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE_MESSAGE)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.message,
        }));
        (self.status, body).into_response()
    }
}
