use base64::Engine;
use chrono::{DateTime, SubsecRound, Utc};
use rand::Rng;
use std::time::Duration;

/// Number of random bytes behind every session id
const SESSION_ID_BYTES: usize = 32;

/// Token pair returned by the provider's token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExchange {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: Option<Duration>,
    pub scopes: Vec<String>,
}

/// Which credential is presented to the token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGrant {
    AuthorizationCode(String),
    RefreshToken(String),
}

impl TokenGrant {
    pub fn kind(&self) -> &'static str {
        match self {
            TokenGrant::AuthorizationCode(_) => "authorization_code",
            TokenGrant::RefreshToken(_) => "refresh_token",
        }
    }
}

/// Persisted state of one logged-in browser session.
///
/// The token pair and its issuance time can only change together, through
/// [`SessionRecord::rotate`]. The id is fixed at construction. Issuance time
/// is held at millisecond precision, the resolution it is stored with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    session_id: String,
    access_token: String,
    refresh_token: String,
    issued_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Start a new session with a freshly generated id
    pub fn create(tokens: &TokenExchange, issued_at: DateTime<Utc>) -> Self {
        Self {
            session_id: generate_session_id(),
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            issued_at: issued_at.trunc_subsecs(3),
        }
    }

    /// Rebuild a record read back from storage
    pub fn from_parts(
        session_id: String,
        access_token: String,
        refresh_token: String,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            access_token,
            refresh_token,
            issued_at: issued_at.trunc_subsecs(3),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Replace the token pair after a successful refresh
    pub fn rotate(&mut self, tokens: TokenExchange, issued_at: DateTime<Utc>) {
        self.access_token = tokens.access_token;
        self.refresh_token = tokens.refresh_token;
        self.issued_at = issued_at.trunc_subsecs(3);
    }

    /// True once the access token is at least `window` old.
    /// A clock that moved backwards keeps the token fresh.
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.issued_at)
            .to_std()
            .map(|age| age >= window)
            .unwrap_or(false)
    }
}

/// URL-safe session id carrying 256 bits of randomness
pub fn generate_session_id() -> String {
    let mut rng = rand::rng();
    let random_bytes: Vec<u8> = (0..SESSION_ID_BYTES).map(|_| rng.random()).collect();
    base64::prelude::BASE64_URL_SAFE_NO_PAD.encode(&random_bytes)
}

/// True for values that could have come from [`generate_session_id`].
/// Anything else never reaches the store.
pub fn is_session_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Short prefix of a credential, safe to put in logs
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}...")
}
