use axum::{extract::State, response::Redirect};
use axum_extra::extract::cookie::CookieJar;

use crate::server::{error::ServerError, AppState};

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), ServerError> {
    let session_id = jar
        .get(&state.sessions.settings().cookie_name)
        .map(|c| c.value().to_string());

    let removal = state.sessions.logout(session_id.as_deref()).await?;

    Ok((
        jar.add(removal),
        Redirect::temporary(&state.server.frontend_path("/")),
    ))
}
