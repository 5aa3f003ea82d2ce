use axum::{extract::State, Extension, Json};

use crate::server::{
    error::ServerError,
    middleware::AccessToken,
    models::SessionReply,
    services::ProviderError,
    AppState,
};

/// Profile of the logged-in user, fetched with the session's access token
pub async fn session_info(
    State(state): State<AppState>,
    Extension(token): Extension<AccessToken>,
) -> Result<Json<SessionReply>, ServerError> {
    let info = state
        .provider
        .user_info(token.secret())
        .await
        .map_err(|e| match e {
            ProviderError::Rejected(msg) => ServerError::OAuthError(msg),
            other => ServerError::Internal(other.to_string()),
        })?;

    Ok(Json(SessionReply::from(info)))
}
