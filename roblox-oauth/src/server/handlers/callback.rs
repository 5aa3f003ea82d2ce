use axum::{
    extract::{Query, State},
    response::Redirect,
};
use axum_extra::extract::cookie::CookieJar;

use super::auth_url::{clear_state_cookie, STATE_COOKIE};
use crate::server::{error::ServerError, models::CallbackParams, AppState};

pub async fn oauth_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Redirect), ServerError> {
    tracing::debug!("Callback handler called");

    let expected_state = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.add(clear_state_cookie());

    // The provider sent the user back without a code
    if let Some(error) = params.error.filter(|e| !e.is_empty()) {
        let description = params.error_description.unwrap_or_default();
        tracing::warn!(error = %error, description = %description, "OAuth callback error");
        let message = if description.is_empty() {
            error
        } else {
            format!("{}: {}", error, description)
        };
        return Err(ServerError::BadRequest(message));
    }

    let code = params
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ServerError::BadRequest("Invalid URL query parameters".to_string()))?;

    match (expected_state, params.state) {
        (Some(expected), Some(received)) if expected == received => {}
        _ => {
            tracing::warn!("OAuth state missing or mismatched");
            return Err(ServerError::BadRequest("Invalid OAuth state".to_string()));
        }
    }

    let created = state.sessions.create(&code).await.map_err(|e| {
        tracing::warn!("Failed to create session from authorization code: {}", e);
        ServerError::from(e)
    })?;

    tracing::info!("OAuth callback successful");

    Ok((
        jar.add(created.cookie),
        Redirect::temporary(&state.server.frontend_path("/dash")),
    ))
}
