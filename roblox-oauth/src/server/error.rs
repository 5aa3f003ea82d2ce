use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::server::services::SessionError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("OAuth error: {0}")]
    OAuthError(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ServerError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ServerError::OAuthError(msg) => {
                tracing::warn!("OAuth error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "Identity provider request failed".to_string(),
                )
            }
            ServerError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ServerError::Configuration(msg) | ServerError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<SessionError> for ServerError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NeedsReAuth(cause) => {
                tracing::debug!(cause = %cause, "Re-authentication required");
                ServerError::Unauthorized("Re-authentication required".to_string())
            }
            SessionError::Transport(msg) => ServerError::Internal(format!("Transport error: {}", msg)),
            SessionError::ProviderFailure(msg) => ServerError::OAuthError(msg),
            SessionError::NoActiveSession => ServerError::BadRequest("Already logged out".to_string()),
            SessionError::RefreshContended => {
                ServerError::Unavailable("Session refresh in progress, retry shortly".to_string())
            }
            SessionError::Internal(msg) => ServerError::Internal(msg),
        }
    }
}
