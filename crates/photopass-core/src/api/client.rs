//! API client for the photopass marketplace REST backend.
//!
//! Every call goes through the session coordinator: the stored access token
//! is attached as a bearer credential, and a first 401 triggers one silent
//! refresh followed by exactly one retry of the original request.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::auth::{AuthTokens, SessionCoordinator, SessionUser};
use crate::config::{join_url, Config, Endpoints};
use crate::storage::SessionStore;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// A request that can be sent again after a token refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Whether this request is already the post-refresh retry.
    pub fn is_retry(&self) -> bool {
        self.retried
    }

    fn into_retry(mut self) -> Self {
        self.retried = true;
        self
    }
}

/// Fields accepted by the registration endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub is_photographer: bool,
}

/// API client for the marketplace backend.
/// Clone is cheap - reqwest::Client and the session are both shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    endpoints: Arc<Endpoints>,
    session: SessionCoordinator,
}

impl ApiClient {
    /// Create a client from configuration, using `store` for the session.
    pub fn new(config: &Config, store: Arc<dyn SessionStore>) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self::with_client(
            client,
            &config.api_base_url,
            config.endpoints.clone(),
            config.refresh_timeout(),
            store,
        ))
    }

    /// Create a client around an existing reqwest client.
    pub fn with_client(
        client: Client,
        base_url: &str,
        endpoints: Endpoints,
        refresh_timeout: Duration,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let refresh_url = join_url(base_url, &endpoints.refresh);
        let session = SessionCoordinator::new(store, client.clone(), refresh_url, refresh_timeout);
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            endpoints: Arc::new(endpoints),
            session,
        }
    }

    pub fn session(&self) -> &SessionCoordinator {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, ApiError> {
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("{} from {}", e, url)))
    }

    /// Send once, backing off on 429. Returns any other response as-is,
    /// along with the bearer token it carried.
    ///
    /// `bearer` overrides the stored access token (used for the retry).
    async fn send_once(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<(Response, Option<String>), ApiError> {
        let url = self.url(&request.path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut builder = self.client.request(request.method.clone(), &url);
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            if let Some(ref body) = request.body {
                builder = builder.json(body);
            }
            let (builder, sent) = match bearer {
                Some(token) => (builder.bearer_auth(token), Some(token.to_string())),
                None => self.session.attach_auth(builder, &url),
            };

            let response = builder.send().await?;
            if response.status().as_u16() != 429 {
                return Ok((response, sent));
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2; // Exponential backoff
        }
    }

    /// Send `request`, refreshing the session and retrying once on a first 401.
    ///
    /// If the stored token already differs from the one the request carried,
    /// another request has refreshed in the meantime and the retry uses the
    /// stored token without a new refresh.
    pub async fn execute(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let url = self.url(&request.path);
        let (response, sent) = self.send_once(&request, None).await?;
        if response.status().as_u16() != 401 {
            return Self::check_response(response).await;
        }

        if request.is_retry() || self.session.is_refresh_url(&url) {
            debug!(url = %url, "401 on retried request, giving up");
            return Err(ApiError::Unauthorized);
        }

        let token = match self.session.access_token() {
            Some(stored) if sent.as_deref() != Some(stored.as_str()) => {
                debug!(url = %url, "401 for a replaced token, retrying with the stored one");
                stored
            }
            _ => {
                debug!(url = %url, "401 received, refreshing session");
                self.session.on_unauthorized().await?
            }
        };

        let retry = request.into_retry();
        let (response, _) = self.send_once(&retry, Some(&token)).await?;
        if response.status().as_u16() == 401 {
            warn!(url = %url, "Request still unauthorized after refresh");
            return Err(ApiError::Unauthorized);
        }
        Self::check_response(response).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(ApiRequest::get(path)).await?;
        Self::read_json(response, path).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::Validation(format!("Could not encode request body: {}", e)))?;
        let response = self.execute(ApiRequest::post(path).json(body)).await?;
        Self::read_json(response, path).await
    }

    // ===== Session Endpoints =====

    /// Exchange credentials for a session. Sent without a bearer token so a
    /// stale one cannot cause the sign-in itself to be rejected.
    async fn open_session(&self, path: &str, body: Value) -> Result<SessionUser, ApiError> {
        let url = self.url(path);
        let response = self.client.post(&url).json(&body).send().await?;
        let response = Self::check_response(response).await?;
        let tokens: AuthTokens = Self::read_json(response, path).await?;
        self.session.establish(tokens)
    }

    /// Sign in with email and password
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionUser, ApiError> {
        let body = json!({ "email": email, "password": password });
        self.open_session(&self.endpoints.sign_in, body).await
    }

    /// Create an account and sign in to it
    pub async fn register(&self, request: &RegisterRequest) -> Result<SessionUser, ApiError> {
        let body = serde_json::to_value(request)
            .map_err(|e| ApiError::Validation(format!("Could not encode registration: {}", e)))?;
        self.open_session(&self.endpoints.register, body).await
    }

    /// Trade an OAuth authorization code for a session
    pub async fn exchange_oauth(&self, provider: &str, code: &str) -> Result<SessionUser, ApiError> {
        let path = self.endpoints.oauth_exchange_for(provider);
        self.open_session(&path, json!({ "code": code })).await
    }

    /// Re-fetch the current user and update the stored snapshot.
    pub async fn fetch_current_user(&self) -> Result<SessionUser, ApiError> {
        let user: SessionUser = self.get(&self.endpoints.current_user).await?;
        self.session.update_user(user.clone())?;
        Ok(user)
    }

    pub fn sign_out(&self) {
        self.session.sign_out();
    }
}
