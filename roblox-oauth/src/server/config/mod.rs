use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Configuration {
    pub server: ServerConfiguration,
    pub oauth: OAuthConfiguration,

    #[serde(default)]
    pub store: StoreConfiguration,

    #[serde(default)]
    pub session: SessionConfiguration,
}

/// Deployment context; decides the `Secure` cookie flag and the default log level
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunContext {
    #[serde(alias = "prod")]
    Production,
    #[serde(alias = "test")]
    Testing,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfiguration {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub environment: RunContext,

    /// Origin of the web frontend. Used for CORS and as the base of every redirect.
    pub frontend_url: String,
}

impl ServerConfiguration {
    pub fn secure_cookies(&self) -> bool {
        self.environment == RunContext::Production
    }

    /// Absolute frontend URL for `path`, e.g. `/login`
    pub fn frontend_path(&self, path: &str) -> String {
        format!("{}{}", self.frontend_origin(), path)
    }

    pub fn frontend_origin(&self) -> &str {
        self.frontend_url.trim_end_matches('/')
    }

    pub fn default_log_filter(&self) -> &'static str {
        match self.environment {
            RunContext::Production => "warn",
            RunContext::Testing => "debug",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OAuthConfiguration {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,

    /// Space separated list of scopes requested on the authorize URL
    pub scope: String,

    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_userinfo_url")]
    pub userinfo_url: String,

    #[serde(default = "default_provider_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfiguration {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    #[serde(default = "default_redis_address")]
    pub address: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub database: i64,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    #[serde(default = "default_response_timeout")]
    pub response_timeout_seconds: u64,
}

impl Default for StoreConfiguration {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            address: default_redis_address(),
            password: None,
            database: 0,
            key_prefix: default_key_prefix(),
            connect_timeout_seconds: default_connect_timeout(),
            response_timeout_seconds: default_response_timeout(),
        }
    }
}

impl StoreConfiguration {
    /// Redis connection URL assembled from address, password and database index
    pub fn redis_url(&self) -> Result<String, url::ParseError> {
        let mut redis_url = url::Url::parse(&format!("redis://{}/{}", self.address, self.database))?;
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            redis_url
                .set_password(Some(password))
                .map_err(|_| url::ParseError::EmptyHost)?;
        }
        Ok(redis_url.to_string())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfiguration {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Sliding expiry of the stored record and max-age of the session cookie
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,

    /// Age after which an access token is refreshed, regardless of `expires_in`
    #[serde(default = "default_access_token_window")]
    pub access_token_window_seconds: u64,

    #[serde(default = "default_refresh_lease")]
    pub refresh_lease_millis: u64,

    #[serde(default = "default_lease_poll")]
    pub lease_poll_millis: u64,
}

impl Default for SessionConfiguration {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            ttl_seconds: default_session_ttl(),
            access_token_window_seconds: default_access_token_window(),
            refresh_lease_millis: default_refresh_lease(),
            lease_poll_millis: default_lease_poll(),
        }
    }
}

impl SessionConfiguration {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn access_token_window(&self) -> Duration {
        Duration::from_secs(self.access_token_window_seconds)
    }

    pub fn refresh_lease(&self) -> Duration {
        Duration::from_millis(self.refresh_lease_millis)
    }

    pub fn lease_poll(&self) -> Duration {
        Duration::from_millis(self.lease_poll_millis)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6969
}

fn default_authorize_url() -> String {
    "https://apis.roblox.com/oauth/v1/authorize".to_string()
}

fn default_token_url() -> String {
    "https://apis.roblox.com/oauth/v1/token".to_string()
}

fn default_userinfo_url() -> String {
    "https://apis.roblox.com/oauth/v1/userinfo".to_string()
}

fn default_provider_timeout() -> u64 {
    10
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Redis
}

fn default_redis_address() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "robloxoauth:".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_response_timeout() -> u64 {
    5
}

fn default_cookie_name() -> String {
    "session_cookie".to_string()
}

// 90 days
fn default_session_ttl() -> u64 {
    60 * 60 * 24 * 90
}

fn default_access_token_window() -> u64 {
    15
}

// provider timeout plus a store write
fn default_refresh_lease() -> u64 {
    15_000
}

fn default_lease_poll() -> u64 {
    100
}

impl Configuration {
    pub fn new() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if std::path::Path::new("config.toml").exists() {
            builder = builder.add_source(config::File::with_name("config"));
        }

        builder = builder.add_source(config::Environment::with_prefix("ROBLOX_OAUTH").separator("__"));

        builder.build()?.try_deserialize()
    }
}
