use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use std::fmt;

use crate::server::{
    error::ServerError,
    models::redact,
    services::SessionError,
    AppState,
};

/// Access token resolved for the current request, stored in request extensions
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AccessToken").field(&redact(&self.0)).finish()
    }
}

/// Resolves the session cookie into an access token before the inner handler runs.
///
/// A refreshed session gets its cookie re-issued on the response. Requests that
/// need a fresh authorization are redirected to the frontend's login page.
pub async fn require_access_token(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let session_id = jar
        .get(&state.sessions.settings().cookie_name)
        .map(|c| c.value().to_string());

    match state.sessions.resolve(session_id.as_deref()).await {
        Ok(resolved) => {
            request
                .extensions_mut()
                .insert(AccessToken(resolved.access_token));
            let response = next.run(request).await;

            match resolved.cookie {
                Some(cookie) => (jar.add(cookie), response).into_response(),
                None => response,
            }
        }
        Err(SessionError::NeedsReAuth(cause)) => {
            tracing::info!(cause = %cause, "Redirecting to login");
            Redirect::temporary(&state.server.frontend_path("/login")).into_response()
        }
        Err(e) => {
            tracing::warn!("Error while resolving access token: {}", e);
            ServerError::from(e).into_response()
        }
    }
}
