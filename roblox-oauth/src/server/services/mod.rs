pub mod provider_client;
pub mod session_manager;
pub mod session_store;

pub use provider_client::{ProviderClient, ProviderError};
pub use session_manager::{
    Created, ReAuthCause, Resolved, SessionError, SessionManager, SessionSettings,
};
pub use session_store::{
    LeaseToken, Lookup, MemorySessionStore, RedisSessionStore, SessionStore, StoreError,
};
