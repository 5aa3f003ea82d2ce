use serde::{Deserialize, Serialize};

// GET /auth/auth_url
#[derive(Debug, Serialize)]
pub struct AuthUrlResponse {
    pub url: String,
}

// GET /auth/callback
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

// Provider user-info body
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub profile: Option<String>,
}

// GET /sessions/session
#[derive(Debug, Serialize)]
pub struct SessionReply {
    pub username: String,
    pub display_name: String,
    pub user_id: String,
}

impl From<UserInfo> for SessionReply {
    fn from(info: UserInfo) -> Self {
        let username = info.preferred_username.unwrap_or_default();
        Self {
            display_name: info.nickname.unwrap_or_else(|| username.clone()),
            username,
            user_id: info.sub,
        }
    }
}

// Health check
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
