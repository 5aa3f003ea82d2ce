use oauth2::{
    basic::{BasicClient, BasicErrorResponse},
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, HttpRequest, HttpResponse, RedirectUrl, RefreshToken, RequestTokenError, Scope,
    TokenResponse, TokenUrl,
};
use rand::Rng;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::server::config::OAuthConfiguration;
use crate::server::error::ServerError;
use crate::server::models::{TokenExchange, TokenGrant, UserInfo};

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Outcome of a failed call to the identity provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered with a standard OAuth error body
    #[error("provider rejected the request: {0}")]
    Rejected(String),

    /// Non-200 answer without a usable error body, or an unusable 200 body
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// The provider could not be reached in time
    #[error("provider unreachable: {0}")]
    Transport(String),
}

impl From<RequestTokenError<reqwest::Error, BasicErrorResponse>> for ProviderError {
    fn from(err: RequestTokenError<reqwest::Error, BasicErrorResponse>) -> Self {
        match err {
            RequestTokenError::ServerResponse(response) => {
                ProviderError::Rejected(response.to_string())
            }
            RequestTokenError::Request(e) => ProviderError::Transport(e.to_string()),
            RequestTokenError::Parse(e, _) => ProviderError::Malformed(e.to_string()),
            RequestTokenError::Other(msg) => ProviderError::Malformed(msg),
        }
    }
}

// Forwards oauth2 requests through our own reqwest client
async fn send(client: reqwest::Client, request: HttpRequest) -> Result<HttpResponse, reqwest::Error> {
    let mut builder = client
        .request(request.method().clone(), request.uri().to_string())
        .body(request.body().clone());

    for (name, value) in request.headers() {
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    let response = builder.send().await?;
    let status = response.status();
    let body = response.bytes().await?.to_vec();

    if status == StatusCode::UNAUTHORIZED {
        tracing::debug!("Token endpoint answered 401");
    } else if !status.is_success() {
        tracing::warn!(status = %status, "Token endpoint answered with non-200 status");
    }

    let mut http_response = HttpResponse::new(body);
    *http_response.status_mut() = status;

    Ok(http_response)
}

/// Client for the identity provider's authorize, token and user-info endpoints
pub struct ProviderClient {
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    auth_url: AuthUrl,
    token_url: TokenUrl,
    redirect_url: RedirectUrl,
    userinfo_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl ProviderClient {
    pub fn new(config: &OAuthConfiguration) -> Result<Self, ServerError> {
        let auth_url = AuthUrl::new(config.authorize_url.clone())
            .map_err(|e| ServerError::Configuration(format!("Invalid auth URL: {}", e)))?;

        let token_url = TokenUrl::new(config.token_url.clone())
            .map_err(|e| ServerError::Configuration(format!("Invalid token URL: {}", e)))?;

        let redirect_url = RedirectUrl::new(config.redirect_uri.clone())
            .map_err(|e| ServerError::Configuration(format!("Invalid redirect URI: {}", e)))?;

        url::Url::parse(&config.userinfo_url)
            .map_err(|e| ServerError::Configuration(format!("Invalid user-info URL: {}", e)))?;

        let timeout = Duration::from_secs(config.timeout_seconds);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ServerError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes: config.scope.split_whitespace().map(str::to_string).collect(),
            auth_url,
            token_url,
            redirect_url,
            userinfo_url: config.userinfo_url.clone(),
            timeout,
            http,
        })
    }

    /// Upper bound of a single call to the provider
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn oauth_client(&self) -> ConfiguredClient {
        BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_type(AuthType::RequestBody)
            .set_auth_uri(self.auth_url.clone())
            .set_token_uri(self.token_url.clone())
            .set_redirect_uri(self.redirect_url.clone())
    }

    /// Build authorization URL with state parameter for CSRF protection
    pub fn authorization_url(&self, state: &str) -> String {
        let csrf_token = CsrfToken::new(state.to_string());
        let (auth_url, _) = self
            .oauth_client()
            .authorize_url(|| csrf_token)
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .url();
        auth_url.to_string()
    }

    /// Trade an authorization code or a refresh token for a new token pair
    pub async fn exchange(&self, grant: &TokenGrant) -> Result<TokenExchange, ProviderError> {
        let http = |request: HttpRequest| send(self.http.clone(), request);
        let client = self.oauth_client();

        let token_result = match grant {
            TokenGrant::AuthorizationCode(code) => {
                client
                    .exchange_code(AuthorizationCode::new(code.clone()))
                    .request_async(&http)
                    .await?
            }
            TokenGrant::RefreshToken(refresh_token) => {
                client
                    .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
                    .request_async(&http)
                    .await?
            }
        };

        let refresh_token = token_result
            .refresh_token()
            .ok_or_else(|| ProviderError::Malformed("No refresh token in response".to_string()))?
            .secret()
            .to_string();

        let exchange = TokenExchange {
            access_token: token_result.access_token().secret().to_string(),
            refresh_token,
            token_type: token_result.token_type().as_ref().to_string(),
            expires_in: token_result.expires_in(),
            scopes: token_result
                .scopes()
                .map(|scopes| scopes.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
        };

        tracing::debug!(
            grant = grant.kind(),
            expires_in = ?exchange.expires_in,
            scopes = ?exchange.scopes,
            "Token exchange succeeded"
        );

        Ok(exchange)
    }

    /// Fetch the profile of the user owning `access_token`
    pub async fn user_info(&self, access_token: &str) -> Result<UserInfo, ProviderError> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(status = %status, "User-info endpoint answered with non-200 status");
            return Err(ProviderError::Rejected(format!(
                "user-info returned {}",
                status
            )));
        }

        response
            .json::<UserInfo>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    /// Generate a random CSRF state token
    pub fn generate_state_token() -> String {
        use base64::Engine;
        let mut rng = rand::rng();
        let random_bytes: Vec<u8> = (0..32).map(|_| rng.random()).collect();
        base64::prelude::BASE64_URL_SAFE_NO_PAD.encode(&random_bytes)
    }
}
