//! Session lifecycle: create from an authorization code, resolve (and refresh)
//! on every authenticated request, delete on logout.

use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

use super::provider_client::{ProviderClient, ProviderError};
use super::session_store::{Lookup, SessionStore, StoreError};

/// Slack on top of the provider timeout for writing the rotated record
const LEASE_WRITE_MARGIN: Duration = Duration::from_secs(2);
use crate::server::config::SessionConfiguration;
use crate::server::models::{is_session_id, redact, SessionRecord, TokenGrant};

/// Why a request has to go through the authorization flow again
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReAuthCause {
    MissingCookie,
    MalformedCookie,
    MissingRecord,
    IncompleteRecord,
    RefreshRejected(String),
}

impl fmt::Display for ReAuthCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCookie => write!(f, "no session cookie"),
            Self::MalformedCookie => write!(f, "session cookie is not a session id"),
            Self::MissingRecord => write!(f, "no stored session"),
            Self::IncompleteRecord => write!(f, "stored session is incomplete"),
            Self::RefreshRejected(reason) => write!(f, "refresh rejected: {}", reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("needs re-authentication: {0}")]
    NeedsReAuth(ReAuthCause),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider failure: {0}")]
    ProviderFailure(String),

    #[error("no active session")]
    NoActiveSession,

    #[error("session refresh still in progress elsewhere")]
    RefreshContended,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transport(msg) => SessionError::Transport(msg),
            StoreError::Corrupt(msg) | StoreError::Backend(msg) => SessionError::Internal(msg),
        }
    }
}

/// Knobs of the session state machine
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub cookie_name: String,
    pub ttl: Duration,
    pub access_token_window: Duration,
    pub refresh_lease: Duration,
    pub lease_poll: Duration,
    pub secure_cookies: bool,
}

impl SessionSettings {
    pub fn new(config: &SessionConfiguration, secure_cookies: bool) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            ttl: config.ttl(),
            access_token_window: config.access_token_window(),
            refresh_lease: config.refresh_lease(),
            lease_poll: config.lease_poll(),
            secure_cookies,
        }
    }
}

/// A freshly created session and the cookie that hands its id to the browser
#[derive(Debug)]
pub struct Created {
    pub record: SessionRecord,
    pub cookie: Cookie<'static>,
}

/// A usable access token. `cookie` is set when the session was refreshed.
#[derive(Debug)]
pub struct Resolved {
    pub access_token: String,
    pub cookie: Option<Cookie<'static>>,
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    provider: Arc<ProviderClient>,
    settings: SessionSettings,
    lease_hold: Duration,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Arc<ProviderClient>,
        settings: SessionSettings,
    ) -> Self {
        // The lease has to outlive the refresh it guards
        let floor = provider.timeout() + LEASE_WRITE_MARGIN;
        if settings.refresh_lease < floor {
            tracing::warn!(
                configured = ?settings.refresh_lease,
                used = ?floor,
                "Refresh lease shorter than a provider call, raising it"
            );
        }
        let lease_hold = settings.refresh_lease.max(floor);

        Self {
            store,
            provider,
            settings,
            lease_hold,
        }
    }

    /// How long a refresh lease is held, and how long other requests wait on it
    pub fn lease_hold(&self) -> Duration {
        self.lease_hold
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Exchange `code` and persist a new session.
    /// Nothing is written when the provider refuses the code.
    pub async fn create(&self, code: &str) -> Result<Created, SessionError> {
        let tokens = self
            .provider
            .exchange(&TokenGrant::AuthorizationCode(code.to_string()))
            .await
            .map_err(|e| match e {
                ProviderError::Transport(msg) => SessionError::Transport(msg),
                other => SessionError::ProviderFailure(other.to_string()),
            })?;

        let record = SessionRecord::create(&tokens, Utc::now());
        self.store.put(&record, self.settings.ttl).await?;

        tracing::info!(session = %redact(record.session_id()), "Session created");

        let cookie = self.session_cookie(record.session_id());
        Ok(Created { record, cookie })
    }

    /// Return a valid access token for the session named by the cookie,
    /// refreshing it first when it is older than the access-token window
    pub async fn resolve(&self, session_id: Option<&str>) -> Result<Resolved, SessionError> {
        let Some(session_id) = session_id.filter(|id| !id.is_empty()) else {
            return Err(SessionError::NeedsReAuth(ReAuthCause::MissingCookie));
        };
        if !is_session_id(session_id) {
            return Err(SessionError::NeedsReAuth(ReAuthCause::MalformedCookie));
        }

        let span = tracing::info_span!("resolve_session", session = %redact(session_id));
        self.resolve_inner(session_id).instrument(span).await
    }

    async fn resolve_inner(&self, session_id: &str) -> Result<Resolved, SessionError> {
        let mut record = self.load(session_id).await?;
        let deadline = tokio::time::Instant::now() + self.lease_hold;

        loop {
            if !record.is_stale(Utc::now(), self.settings.access_token_window) {
                tracing::debug!(access_token = %redact(record.access_token()), "Access token fresh, reusing");
                return Ok(Resolved {
                    access_token: record.access_token().to_string(),
                    cookie: None,
                });
            }

            if let Some(lease) = self.store.try_lease(session_id, self.lease_hold).await? {
                // Re-read under the lease: a refresh that finished since our read has rotated the token
                let outcome = match self.load(session_id).await {
                    Ok(current) if !current.is_stale(Utc::now(), self.settings.access_token_window) => {
                        Ok(Resolved {
                            access_token: current.access_token().to_string(),
                            cookie: None,
                        })
                    }
                    Ok(current) => self.refresh(current).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = self.store.release_lease(session_id, &lease).await {
                    tracing::warn!("Failed to release refresh lease: {}", e);
                }
                return outcome;
            }

            // Another request is refreshing this session: wait for its write
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("Gave up waiting for concurrent refresh");
                return Err(SessionError::RefreshContended);
            }
            tracing::debug!("Refresh lease held elsewhere, re-reading");
            tokio::time::sleep(self.settings.lease_poll).await;
            record = self.load(session_id).await?;
        }
    }

    async fn load(&self, session_id: &str) -> Result<SessionRecord, SessionError> {
        match self.store.get(session_id).await? {
            Lookup::Found(record) => Ok(record),
            Lookup::Missing => Err(SessionError::NeedsReAuth(ReAuthCause::MissingRecord)),
            Lookup::Incomplete => {
                tracing::warn!("Stored session is missing fields");
                Err(SessionError::NeedsReAuth(ReAuthCause::IncompleteRecord))
            }
        }
    }

    /// Rotate the token pair. The stored record is only touched on success.
    async fn refresh(&self, mut record: SessionRecord) -> Result<Resolved, SessionError> {
        tracing::debug!(
            refresh_token = %redact(record.refresh_token()),
            access_token = %redact(record.access_token()),
            "Access token stale, refreshing"
        );

        let tokens = self
            .provider
            .exchange(&TokenGrant::RefreshToken(record.refresh_token().to_string()))
            .await
            .map_err(|e| match e {
                ProviderError::Transport(msg) => {
                    tracing::warn!("Provider unreachable during refresh: {}", msg);
                    SessionError::Transport(msg)
                }
                rejected => {
                    tracing::info!("Provider refused refresh: {}", rejected);
                    SessionError::NeedsReAuth(ReAuthCause::RefreshRejected(rejected.to_string()))
                }
            })?;

        record.rotate(tokens, Utc::now());
        self.store.put(&record, self.settings.ttl).await?;

        tracing::info!("Session refreshed");

        Ok(Resolved {
            access_token: record.access_token().to_string(),
            cookie: Some(self.session_cookie(record.session_id())),
        })
    }

    /// Forget the session. Succeeds whether or not the record still exists.
    pub async fn logout(&self, session_id: Option<&str>) -> Result<Cookie<'static>, SessionError> {
        let Some(session_id) = session_id.filter(|id| !id.is_empty()) else {
            return Err(SessionError::NoActiveSession);
        };

        if is_session_id(session_id) {
            self.store.delete(session_id).await?;
            tracing::info!(session = %redact(session_id), "Session deleted");
        }

        Ok(self.removal_cookie())
    }

    pub fn session_cookie(&self, session_id: &str) -> Cookie<'static> {
        let max_age = time::Duration::try_from(self.settings.ttl).unwrap_or(time::Duration::MAX);

        Cookie::build((self.settings.cookie_name.clone(), session_id.to_string()))
            .http_only(true)
            .secure(self.settings.secure_cookies)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(max_age)
            .build()
    }

    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.settings.cookie_name.clone(), ""))
            .http_only(true)
            .secure(self.settings.secure_cookies)
            .path("/")
            .max_age(time::Duration::ZERO)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::OAuthConfiguration;
    use crate::server::services::MemorySessionStore;

    fn manager(secure: bool) -> SessionManager {
        manager_with(
            MemorySessionStore::new("test:"),
            SessionSettings::new(&SessionConfiguration::default(), secure),
        )
    }

    fn manager_with(store: MemorySessionStore, settings: SessionSettings) -> SessionManager {
        let provider = ProviderClient::new(&OAuthConfiguration {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost/auth/callback".to_string(),
            scope: "openid".to_string(),
            authorize_url: "http://localhost/authorize".to_string(),
            token_url: "http://localhost/token".to_string(),
            userinfo_url: "http://localhost/userinfo".to_string(),
            timeout_seconds: 1,
        })
        .unwrap();

        SessionManager::new(Arc::new(store), Arc::new(provider), settings)
    }

    #[tokio::test]
    async fn test_session_cookie_attributes() {
        let cookie = manager(true).session_cookie("abc");

        assert_eq!(cookie.name(), "session_cookie");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(90)));
    }

    #[tokio::test]
    async fn test_cookie_not_secure_outside_production() {
        assert_eq!(manager(false).session_cookie("abc").secure(), Some(false));
    }

    #[tokio::test]
    async fn test_removal_cookie_expires_immediately() {
        let cookie = manager(true).removal_cookie();
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
    }

    #[tokio::test]
    async fn test_empty_cookie_value_needs_reauth() {
        let err = manager(false).resolve(Some("")).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::NeedsReAuth(ReAuthCause::MissingCookie)
        ));
    }

    #[tokio::test]
    async fn test_logout_without_cookie_is_reported() {
        assert!(matches!(
            manager(false).logout(None).await,
            Err(SessionError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn test_malformed_cookie_needs_reauth_without_store_lookup() {
        let err = manager(false).resolve(Some("lease:abc")).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::NeedsReAuth(ReAuthCause::MalformedCookie)
        ));

        // logout still clears the browser cookie
        let removal = manager(false).logout(Some("lease:abc")).await.unwrap();
        assert_eq!(removal.value(), "");
    }

    #[tokio::test]
    async fn test_incomplete_record_needs_reauth() {
        let store = MemorySessionStore::new("test:");
        let record = SessionRecord::from_parts(
            "partial".to_string(),
            "at".to_string(),
            "rt".to_string(),
            Utc::now() - chrono::Duration::seconds(60),
        );
        store.put(&record, Duration::from_secs(60)).await.unwrap();
        store.set_raw_field("partial", "refresh_token", "");

        let manager = manager_with(
            store,
            SessionSettings::new(&SessionConfiguration::default(), false),
        );
        let err = manager.resolve(Some("partial")).await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::NeedsReAuth(ReAuthCause::IncompleteRecord)
        ));
    }

    #[tokio::test]
    async fn test_lease_hold_outlives_provider_call() {
        let mut settings = SessionSettings::new(&SessionConfiguration::default(), false);
        settings.refresh_lease = Duration::from_millis(150);
        let short = manager_with(MemorySessionStore::new("test:"), settings);
        // 1 s provider timeout plus the write margin
        assert_eq!(short.lease_hold(), Duration::from_secs(3));

        let default = manager(false);
        assert_eq!(default.lease_hold(), Duration::from_secs(15));
    }
}
