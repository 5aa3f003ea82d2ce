//! Keyed persistence of [`SessionRecord`]s with a sliding expiry.
//!
//! Every record is written as one hash under `prefix + lowercase(session_id)`
//! with the fields `ssid`, `access_token`, `refresh_token` and `created_epoch`
//! (milliseconds since the Unix epoch). Backends never hand out partial
//! records: a hash with a missing or empty field reads back as
//! [`Lookup::Incomplete`].

mod memory;
mod redis;

pub use memory::MemorySessionStore;
pub use self::redis::RedisSessionStore;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::server::models::{generate_session_id, SessionRecord};

const FIELD_SSID: &str = "ssid";
const FIELD_ACCESS_TOKEN: &str = "access_token";
const FIELD_REFRESH_TOKEN: &str = "refresh_token";
const FIELD_CREATED_EPOCH: &str = "created_epoch";

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection failure or timeout talking to the backend
    #[error("session store unreachable: {0}")]
    Transport(String),

    /// A stored record that cannot be decoded
    #[error("corrupt session record: {0}")]
    Corrupt(String),

    #[error("session store error: {0}")]
    Backend(String),
}

/// Result of reading a session key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(SessionRecord),
    /// No such key, or it has expired
    Missing,
    /// The key exists but a required field is absent or empty
    Incomplete,
}

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Write every field of `record` and reset the key's expiry to `ttl`, as one unit
    async fn put(&self, record: &SessionRecord, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, session_id: &str) -> Result<Lookup, StoreError>;

    /// Remove the record. Removing an absent key succeeds.
    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    /// Take the per-session refresh lease for `hold`.
    /// Returns `None` while another holder has it.
    async fn try_lease(
        &self,
        session_id: &str,
        hold: Duration,
    ) -> Result<Option<LeaseToken>, StoreError>;

    /// Release the lease if `token` still owns it. A lease that expired and
    /// was taken by someone else is left alone.
    async fn release_lease(&self, session_id: &str, token: &LeaseToken) -> Result<(), StoreError>;

    /// Verify the backend is reachable
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Proof of ownership of a refresh lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub fn generate() -> Self {
        Self(generate_session_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Namespaced, case-normalized key of a session record
pub fn record_key(prefix: &str, session_id: &str) -> String {
    format!("{}{}", prefix.to_lowercase(), session_id.to_lowercase())
}

/// Namespaced, case-normalized key of a session's refresh lease
pub fn lease_key(prefix: &str, session_id: &str) -> String {
    format!("{}lease:{}", prefix.to_lowercase(), session_id.to_lowercase())
}

fn encode_fields(record: &SessionRecord) -> Vec<(&'static str, String)> {
    vec![
        (FIELD_SSID, record.session_id().to_string()),
        (FIELD_ACCESS_TOKEN, record.access_token().to_string()),
        (FIELD_REFRESH_TOKEN, record.refresh_token().to_string()),
        (
            FIELD_CREATED_EPOCH,
            record.issued_at().timestamp_millis().to_string(),
        ),
    ]
}

fn decode_fields(fields: &HashMap<String, String>) -> Result<Lookup, StoreError> {
    if fields.is_empty() {
        return Ok(Lookup::Missing);
    }

    let field = |name: &str| fields.get(name).filter(|value| !value.is_empty());

    let (Some(ssid), Some(access_token), Some(refresh_token), Some(created_epoch)) = (
        field(FIELD_SSID),
        field(FIELD_ACCESS_TOKEN),
        field(FIELD_REFRESH_TOKEN),
        field(FIELD_CREATED_EPOCH),
    ) else {
        return Ok(Lookup::Incomplete);
    };

    let issued_at = created_epoch
        .parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .ok_or_else(|| {
            StoreError::Corrupt(format!("unreadable {FIELD_CREATED_EPOCH}: {created_epoch}"))
        })?;

    Ok(Lookup::Found(SessionRecord::from_parts(
        ssid.clone(),
        access_token.clone(),
        refresh_token.clone(),
        issued_at,
    )))
}
