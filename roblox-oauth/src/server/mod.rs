pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Configuration;
pub use error::ServerError;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use config::{ServerConfiguration, StoreBackend};
use services::{
    MemorySessionStore, ProviderClient, RedisSessionStore, SessionManager, SessionSettings,
    SessionStore,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub provider: Arc<ProviderClient>,
    pub server: Arc<ServerConfiguration>,
}

impl AppState {
    /// Connect to the configured store and wire up the services
    pub async fn from_configuration(configuration: &Configuration) -> Result<Self, ServerError> {
        let store: Arc<dyn SessionStore> = match configuration.store.backend {
            StoreBackend::Redis => Arc::new(
                RedisSessionStore::connect(&configuration.store)
                    .await
                    .map_err(|e| {
                        ServerError::Configuration(format!("Failed to connect to Redis: {}", e))
                    })?,
            ),
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory session store; sessions will not survive a restart");
                Arc::new(MemorySessionStore::new(configuration.store.key_prefix.clone()))
            }
        };

        let provider = Arc::new(ProviderClient::new(&configuration.oauth)?);
        let settings = SessionSettings::new(
            &configuration.session,
            configuration.server.secure_cookies(),
        );

        Ok(Self {
            sessions: Arc::new(SessionManager::new(store, provider.clone(), settings)),
            provider,
            server: Arc::new(configuration.server.clone()),
        })
    }
}

/// Routes of the service, wrapped in tracing, body-size and CORS layers
pub fn router(state: AppState) -> Result<Router, ServerError> {
    let origin = HeaderValue::from_str(state.server.frontend_origin()).map_err(|e| {
        ServerError::Configuration(format!("Invalid frontend URL for CORS: {}", e))
    })?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let sessions = Router::new()
        .route("/session", get(handlers::session_info))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_access_token,
        ));

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/auth/auth_url", get(handlers::auth_url))
        .route("/auth/callback", get(handlers::oauth_callback))
        .route("/auth/logout", get(handlers::logout))
        .nest("/sessions", sessions)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Cors answers preflights itself and needs a Default inner body
                .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
                .layer(cors),
        )
        .with_state(state);

    Ok(app)
}
