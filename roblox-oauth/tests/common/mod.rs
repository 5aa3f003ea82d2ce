#![allow(dead_code)]

use chrono::Utc;
use roblox_oauth::server::{
    config::{OAuthConfiguration, SessionConfiguration},
    models::SessionRecord,
    services::{MemorySessionStore, ProviderClient, SessionManager, SessionSettings},
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const TOKEN_PATH: &str = "/oauth/v1/token";
pub const USERINFO_PATH: &str = "/oauth/v1/userinfo";

pub struct Harness {
    pub provider_server: MockServer,
    pub provider: Arc<ProviderClient>,
    pub store: MemorySessionStore,
    pub manager: Arc<SessionManager>,
}

pub fn oauth_configuration(base_url: &str) -> OAuthConfiguration {
    oauth_configuration_with_timeout(base_url, 5)
}

pub fn oauth_configuration_with_timeout(base_url: &str, timeout_seconds: u64) -> OAuthConfiguration {
    OAuthConfiguration {
        client_id: "client-123".to_string(),
        client_secret: "client-secret".to_string(),
        redirect_uri: "https://api.example.com/auth/callback".to_string(),
        scope: "openid profile".to_string(),
        authorize_url: format!("{}/oauth/v1/authorize", base_url),
        token_url: format!("{}{}", base_url, TOKEN_PATH),
        userinfo_url: format!("{}{}", base_url, USERINFO_PATH),
        timeout_seconds,
    }
}

pub fn session_settings() -> SessionSettings {
    let mut settings = SessionSettings::new(&SessionConfiguration::default(), false);
    settings.refresh_lease = Duration::from_secs(2);
    settings.lease_poll = Duration::from_millis(20);
    settings
}

pub async fn harness() -> Harness {
    harness_with(session_settings(), 5).await
}

pub async fn harness_with(settings: SessionSettings, provider_timeout_seconds: u64) -> Harness {
    let provider_server = MockServer::start().await;
    let provider = Arc::new(
        ProviderClient::new(&oauth_configuration_with_timeout(
            &provider_server.uri(),
            provider_timeout_seconds,
        ))
        .expect("provider client"),
    );
    let store = MemorySessionStore::new("robloxoauth:");
    let manager = Arc::new(SessionManager::new(
        Arc::new(store.clone()),
        provider.clone(),
        settings,
    ));

    Harness {
        provider_server,
        provider,
        store,
        manager,
    }
}

pub fn token_body(access_token: &str, refresh_token: &str) -> serde_json::Value {
    json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "token_type": "Bearer",
        "expires_in": 899,
        "scope": "openid profile",
    })
}

/// Token endpoint answering an authorization-code grant for `code`
pub fn code_grant(code: &str, access_token: &str, refresh_token: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains(format!("code={}", code)))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access_token, refresh_token)))
}

/// Token endpoint answering a refresh grant for `refresh_token`
pub fn refresh_grant(refresh_token: &str, response: ResponseTemplate) -> Mock {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains(format!("refresh_token={}", refresh_token)))
        .respond_with(response)
}

/// Any call to the token endpoint
pub fn any_token_call() -> Mock {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(500))
}

pub fn record_issued_ago(
    session_id: &str,
    access_token: &str,
    refresh_token: &str,
    age: Duration,
) -> SessionRecord {
    SessionRecord::from_parts(
        session_id.to_string(),
        access_token.to_string(),
        refresh_token.to_string(),
        Utc::now() - chrono::Duration::from_std(age).expect("age in range"),
    )
}

pub fn fresh_record(session_id: &str, access_token: &str, refresh_token: &str) -> SessionRecord {
    record_issued_ago(session_id, access_token, refresh_token, Duration::ZERO)
}

pub fn stale_record(session_id: &str, access_token: &str, refresh_token: &str) -> SessionRecord {
    record_issued_ago(session_id, access_token, refresh_token, Duration::from_secs(60))
}
