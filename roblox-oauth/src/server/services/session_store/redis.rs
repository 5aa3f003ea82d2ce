use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, RedisError, Script};
use std::collections::HashMap;
use std::time::Duration;

use super::{
    decode_fields, encode_fields, lease_key, record_key, LeaseToken, Lookup, SessionStore,
    StoreError,
};
use crate::server::config::StoreConfiguration;
use crate::server::models::{redact, SessionRecord};

// Delete the lease only while it still carries the caller's token
const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_timeout()
            || err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            StoreError::Transport(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// Session records kept as Redis hashes.
///
/// `ConnectionManager` reconnects on its own; cloning it is cheap and gives
/// each call its own handle onto the shared multiplexed connection.
#[derive(Clone)]
pub struct RedisSessionStore {
    manager: ConnectionManager,
    key_prefix: String,
}

impl RedisSessionStore {
    /// Connect and verify the server answers a PING
    pub async fn connect(config: &StoreConfiguration) -> Result<Self, StoreError> {
        let redis_url = config
            .redis_url()
            .map_err(|e| StoreError::Backend(format!("Invalid Redis address: {}", e)))?;

        let client = redis::Client::open(redis_url.as_str())?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .set_response_timeout(Duration::from_secs(config.response_timeout_seconds));

        let manager = ConnectionManager::new_with_config(client, manager_config).await?;

        let store = Self {
            manager,
            key_prefix: config.key_prefix.clone(),
        };
        store.ping().await?;

        tracing::info!(address = %config.address, database = config.database, "Connected to Redis");
        Ok(store)
    }
}

#[async_trait::async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, record: &SessionRecord, ttl: Duration) -> Result<(), StoreError> {
        let key = record_key(&self.key_prefix, record.session_id());
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let mut conn = self.manager.clone();

        // MULTI/EXEC so the hash never becomes visible without its expiry
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(&key, &encode_fields(record))
            .ignore()
            .expire(&key, ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!(session = %redact(record.session_id()), "Redis session write failed: {}", e);
                StoreError::from(e)
            })?;

        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Lookup, StoreError> {
        let key = record_key(&self.key_prefix, session_id);
        let mut conn = self.manager.clone();

        let fields: HashMap<String, String> = conn.hgetall(&key).await.map_err(|e| {
            tracing::error!(session = %redact(session_id), "Redis session read failed: {}", e);
            StoreError::from(e)
        })?;

        decode_fields(&fields)
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let key = record_key(&self.key_prefix, session_id);
        let mut conn = self.manager.clone();

        let _: () = conn.del(&key).await?;
        Ok(())
    }

    async fn try_lease(
        &self,
        session_id: &str,
        hold: Duration,
    ) -> Result<Option<LeaseToken>, StoreError> {
        let key = lease_key(&self.key_prefix, session_id);
        let hold_ms = u64::try_from(hold.as_millis()).unwrap_or(u64::MAX).max(1);
        let token = LeaseToken::generate();
        let mut conn = self.manager.clone();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(hold_ms)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.map(|_| token))
    }

    async fn release_lease(&self, session_id: &str, token: &LeaseToken) -> Result<(), StoreError> {
        let key = lease_key(&self.key_prefix, session_id);
        let mut conn = self.manager.clone();

        let released: i64 = Script::new(RELEASE_LEASE_SCRIPT)
            .key(&key)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;
        if released == 0 {
            tracing::debug!(session = %redact(session_id), "Refresh lease already expired or taken over");
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use redis::ErrorKind;
    use std::io;

    #[test]
    fn test_connection_failures_map_to_transport() {
        let refused = RedisError::from(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        let timed_out = RedisError::from(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
        let dropped = RedisError::from(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        let io_kind = RedisError::from((ErrorKind::IoError, "connection closed"));

        for err in [refused, timed_out, dropped, io_kind] {
            assert!(matches!(StoreError::from(err), StoreError::Transport(_)));
        }
    }

    #[test]
    fn test_server_side_errors_map_to_backend() {
        let wrong_type = RedisError::from((
            ErrorKind::TypeError,
            "Operation against a key holding the wrong kind of value",
        ));
        let response = RedisError::from((ErrorKind::ResponseError, "ERR unknown command"));

        for err in [wrong_type, response] {
            assert!(matches!(StoreError::from(err), StoreError::Backend(_)));
        }
    }

    // Needs a server: REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_round_trip_against_live_redis() {
        let Ok(redis_url) = std::env::var("REDIS_URL") else {
            return;
        };
        let address = url::Url::parse(&redis_url)
            .ok()
            .and_then(|u| Some(format!("{}:{}", u.host_str()?, u.port().unwrap_or(6379))))
            .unwrap();
        let config = StoreConfiguration {
            address,
            key_prefix: format!("robloxoauth-test-{}:", LeaseToken::generate().as_str()),
            ..StoreConfiguration::default()
        };
        let store = RedisSessionStore::connect(&config).await.unwrap();

        let record = SessionRecord::from_parts(
            "LiveSession".to_string(),
            "at".to_string(),
            "rt".to_string(),
            Utc::now(),
        );
        store.put(&record, Duration::from_secs(30)).await.unwrap();
        assert_eq!(
            store.get("livesession").await.unwrap(),
            Lookup::Found(record)
        );

        let hold = Duration::from_secs(30);
        let owner = store.try_lease("LiveSession", hold).await.unwrap().unwrap();
        assert!(store.try_lease("LiveSession", hold).await.unwrap().is_none());
        store
            .release_lease("LiveSession", &LeaseToken::generate())
            .await
            .unwrap();
        assert!(store.try_lease("LiveSession", hold).await.unwrap().is_none());
        store.release_lease("LiveSession", &owner).await.unwrap();
        let again = store.try_lease("LiveSession", hold).await.unwrap().unwrap();
        store.release_lease("LiveSession", &again).await.unwrap();

        store.delete("LiveSession").await.unwrap();
        assert_eq!(store.get("LiveSession").await.unwrap(), Lookup::Missing);
        store.ping().await.unwrap();
    }
}
