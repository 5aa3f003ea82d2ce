//! OAuth2 authorization-code broker for Roblox with Redis-backed sessions.
//!
//! The browser only ever holds an opaque session cookie. Access and refresh
//! tokens stay server side and are rotated transparently when the access
//! token is older than the configured window.

pub mod server;

pub use server::models::{SessionRecord, TokenExchange, TokenGrant};
pub use server::services::{SessionError, SessionManager};
