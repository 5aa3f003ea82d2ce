use axum::{extract::State, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::server::{models::AuthUrlResponse, services::ProviderClient, AppState};

pub(super) const STATE_COOKIE: &str = "oauth_state";
const STATE_COOKIE_PATH: &str = "/auth";

pub(super) fn state_cookie(state: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE, state.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path(STATE_COOKIE_PATH)
        .max_age(time::Duration::minutes(5))
        .build()
}

pub(super) fn clear_state_cookie() -> Cookie<'static> {
    Cookie::build((STATE_COOKIE, ""))
        .path(STATE_COOKIE_PATH)
        .max_age(time::Duration::ZERO)
        .build()
}

pub async fn auth_url(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<AuthUrlResponse>) {
    tracing::debug!("Requested auth url");

    // Generate CSRF state token, echoed back by the provider on the callback
    let csrf_state = ProviderClient::generate_state_token();
    let url = state.provider.authorization_url(&csrf_state);

    (
        jar.add(state_cookie(&csrf_state, state.server.secure_cookies())),
        Json(AuthUrlResponse { url }),
    )
}
