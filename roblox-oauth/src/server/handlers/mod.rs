mod auth_url;
mod callback;
mod logout;
mod session;

pub use auth_url::auth_url;
pub use callback::oauth_callback;
pub use logout::logout;
pub use session::session_info;

use axum::{extract::State, http::StatusCode, Json};

use crate::server::{models::HealthResponse, AppState};

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, label) = match state.sessions.store().ping().await {
        Ok(()) => (StatusCode::OK, "healthy"),
        Err(e) => {
            tracing::warn!("Session store health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}
