//! Session coordinator: bearer attachment, silent refresh and sign-out.
//!
//! One coordinator owns one session. At most one refresh call is outstanding
//! at a time; every request that hits a 401 while it runs waits on the same
//! outcome. Waiters are resolved in the order they arrived.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde_json::json;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use super::session::{AuthTokens, CredentialPair, RefreshResponse, SessionUser, StoredSessionUser};
use super::{token, RefreshError};
use crate::api::ApiError;
use crate::storage::{SessionStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_KEYS, SESSION_USER_KEY};

/// Default upper bound on a single refresh exchange.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// Explicit sign-out.
    UserRequested,
    /// The refresh endpoint refused the refresh token.
    RefreshRejected,
    /// Stored session was expired, malformed or incomplete.
    StaleSession,
}

/// Authentication state published to the view layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Nothing checked yet.
    Unknown,
    SignedIn(SessionUser),
    SignedOut(SignOutReason),
}

type Waiter = oneshot::Sender<Result<String, RefreshError>>;

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: VecDeque<Waiter>,
    /// Bumped whenever the session is replaced or torn down, so a refresh
    /// that settles afterwards is ignored.
    epoch: u64,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    http: Client,
    refresh_url: String,
    refresh_timeout: Duration,
    state: Mutex<RefreshState>,
    auth_state: watch::Sender<AuthState>,
}

/// Handle to a session. Clone is cheap; clones share the same session.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        http: Client,
        refresh_url: impl Into<String>,
        refresh_timeout: Duration,
    ) -> Self {
        let (auth_state, _) = watch::channel(AuthState::Unknown);
        Self {
            inner: Arc::new(Inner {
                store,
                http,
                refresh_url: refresh_url.into(),
                refresh_timeout,
                state: Mutex::new(RefreshState::default()),
                auth_state,
            }),
        }
    }

    /// Subscribe to sign-in / sign-out transitions.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.auth_state.subscribe()
    }

    pub fn auth_state(&self) -> AuthState {
        self.inner.auth_state.borrow().clone()
    }

    pub fn refresh_url(&self) -> &str {
        &self.inner.refresh_url
    }

    /// True if `url` targets the refresh endpoint (query string ignored).
    pub fn is_refresh_url(&self, url: &str) -> bool {
        let path = url.split('?').next().unwrap_or(url);
        path.trim_end_matches('/') == self.inner.refresh_url.trim_end_matches('/')
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.store.get(ACCESS_TOKEN_KEY)
    }

    pub fn credentials(&self) -> Option<CredentialPair> {
        Some(CredentialPair {
            access_token: self.inner.store.get(ACCESS_TOKEN_KEY)?,
            refresh_token: self.inner.store.get(REFRESH_TOKEN_KEY),
        })
    }

    /// Stored session user, if present and of the current schema.
    pub fn current_user(&self) -> Option<SessionUser> {
        self.inner
            .store
            .get(SESSION_USER_KEY)
            .as_deref()
            .and_then(StoredSessionUser::parse)
    }

    /// Add the stored access token as a bearer credential.
    ///
    /// Requests to the refresh endpoint are left untouched, as are requests
    /// made while no token is stored. Returns the token that was attached.
    pub fn attach_auth(&self, request: RequestBuilder, url: &str) -> (RequestBuilder, Option<String>) {
        if self.is_refresh_url(url) {
            return (request, None);
        }
        match self.access_token() {
            Some(token) => (request.bearer_auth(&token), Some(token)),
            None => (request, None),
        }
    }

    pub fn refresh_in_flight(&self) -> bool {
        self.inner.lock_state().in_flight
    }

    /// Renew the access token after a 401, sharing any refresh already running.
    ///
    /// Returns the new access token. Terminal errors mean the session has
    /// been cleared and the user must sign in again.
    pub async fn on_unauthorized(&self) -> Result<String, RefreshError> {
        let (tx, rx) = oneshot::channel();
        let lead_epoch = {
            let mut state = self.inner.lock_state();
            state.waiters.push_back(tx);
            if state.in_flight {
                debug!(waiters = state.waiters.len(), "Refresh in flight, queueing request");
                None
            } else {
                state.in_flight = true;
                Some(state.epoch)
            }
        };

        if let Some(epoch) = lead_epoch {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run_refresh(epoch).await });
        }

        rx.await.unwrap_or(Err(RefreshError::Cancelled))
    }

    /// True only for an unexpired, well-formed access token plus a stored user.
    ///
    /// Anything else clears the leftover session locally without a network call.
    pub fn is_authenticated(&self) -> bool {
        let token_valid = self
            .access_token()
            .map(|t| token::is_valid(&t))
            .unwrap_or(false);
        if token_valid && self.current_user().is_some() {
            return true;
        }

        let has_leftovers = SESSION_KEYS
            .iter()
            .any(|key| self.inner.store.get(key).is_some());
        if has_leftovers {
            info!(token_valid, "Clearing stale session");
            self.inner
                .terminate(SignOutReason::StaleSession, RefreshError::Cancelled);
        }
        false
    }

    /// Application-start check of the stored session.
    pub fn restore(&self) -> Option<SessionUser> {
        if !self.is_authenticated() {
            return None;
        }
        let user = self.current_user()?;
        self.auth_state_signed_in(&user);
        Some(user)
    }

    /// Persist a freshly issued session (sign-in, registration, OAuth).
    ///
    /// Any refresh still pending for a previous session is abandoned and its
    /// waiters get `RefreshError::Superseded`.
    pub fn establish(&self, tokens: AuthTokens) -> Result<SessionUser, ApiError> {
        let user = tokens.user;
        let stored_user = serde_json::to_string(&StoredSessionUser::new(user.clone()))
            .map_err(|e| ApiError::Storage(e.to_string()))?;

        let (waiters, written) = {
            let mut state = self.inner.lock_state();
            state.epoch += 1;
            state.in_flight = false;

            let store = &self.inner.store;
            let written = store
                .set(ACCESS_TOKEN_KEY, &tokens.access)
                .and_then(|_| match tokens.refresh.as_deref() {
                    Some(refresh) => store.set(REFRESH_TOKEN_KEY, refresh),
                    None => store.remove(REFRESH_TOKEN_KEY),
                })
                .and_then(|_| store.set(SESSION_USER_KEY, &stored_user));
            match written {
                Ok(()) => {
                    self.auth_state_signed_in(&user);
                }
                Err(_) => {
                    if let Err(e) = store.clear_session() {
                        warn!(error = %e, "Failed to clear partially written session");
                    }
                }
            }
            (std::mem::take(&mut state.waiters), written)
        };

        reject_all(waiters, RefreshError::Superseded);
        written.map_err(|e| ApiError::Storage(format!("{:#}", e)))?;
        info!(user_id = %user.id, role = user.role(), "Session established");
        Ok(user)
    }

    /// Replace the stored user snapshot, e.g. after re-fetching `/me`.
    pub fn update_user(&self, user: SessionUser) -> Result<(), ApiError> {
        let stored_user = serde_json::to_string(&StoredSessionUser::new(user.clone()))
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        self.inner
            .store
            .set(SESSION_USER_KEY, &stored_user)
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))?;
        self.auth_state_signed_in(&user);
        Ok(())
    }

    fn auth_state_signed_in(&self, user: &SessionUser) {
        self.inner
            .auth_state
            .send_replace(AuthState::SignedIn(user.clone()));
    }

    /// Clear the session and cancel every pending refresh waiter.
    pub fn sign_out(&self) {
        info!("Signing out");
        self.inner
            .terminate(SignOutReason::UserRequested, RefreshError::Cancelled);
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Clear storage and publish sign-out. Caller must hold the state lock.
    fn clear_session(&self, reason: SignOutReason) {
        if let Err(e) = self.store.clear_session() {
            warn!(error = %e, "Failed to clear stored session");
        }
        self.auth_state.send_replace(AuthState::SignedOut(reason));
    }

    fn terminate(&self, reason: SignOutReason, error: RefreshError) {
        let waiters = {
            let mut state = self.lock_state();
            state.epoch += 1;
            state.in_flight = false;
            self.clear_session(reason);
            std::mem::take(&mut state.waiters)
        };
        reject_all(waiters, error);
    }

    async fn run_refresh(&self, epoch: u64) {
        let outcome = self.request_refresh().await;

        let (waiters, result) = {
            let mut state = self.lock_state();
            if state.epoch != epoch {
                debug!("Session changed during refresh, discarding result");
                return;
            }

            let result = match outcome {
                Ok(tokens) => self.persist_refreshed(&tokens).map(|_| tokens.access),
                Err(e) if e.is_terminal() => {
                    warn!(error = %e, "Refresh rejected, clearing session");
                    self.clear_session(SignOutReason::RefreshRejected);
                    Err(e)
                }
                Err(e) => {
                    warn!(error = %e, "Refresh failed, keeping stored credentials");
                    Err(e)
                }
            };

            state.in_flight = false;
            (std::mem::take(&mut state.waiters), result)
        };

        debug!(waiters = waiters.len(), ok = result.is_ok(), "Refresh settled");
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    fn persist_refreshed(&self, tokens: &RefreshResponse) -> Result<(), RefreshError> {
        self.store
            .set(ACCESS_TOKEN_KEY, &tokens.access)
            .map_err(|e| RefreshError::Storage(format!("{:#}", e)))?;
        if let Some(ref refresh) = tokens.refresh {
            self.store
                .set(REFRESH_TOKEN_KEY, refresh)
                .map_err(|e| RefreshError::Storage(format!("{:#}", e)))?;
        }
        Ok(())
    }

    async fn request_refresh(&self) -> Result<RefreshResponse, RefreshError> {
        let refresh_token = self
            .store
            .get(REFRESH_TOKEN_KEY)
            .ok_or(RefreshError::NoRefreshToken)?;

        debug!(url = %self.refresh_url, "Refreshing access token");
        let exchange = async {
            let response = self
                .http
                .post(&self.refresh_url)
                .json(&json!({ "refresh": refresh_token }))
                .send()
                .await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = match tokio::time::timeout(self.refresh_timeout, exchange).await {
            Err(_) => return Err(RefreshError::Timeout),
            Ok(Err(e)) => return Err(RefreshError::Transport(e.to_string())),
            Ok(Ok(exchange)) => exchange,
        };

        match status.as_u16() {
            200..=299 => {
                let tokens: RefreshResponse = serde_json::from_str(&body)
                    .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
                if tokens.access.is_empty() {
                    return Err(RefreshError::InvalidResponse("empty access token".to_string()));
                }
                Ok(tokens)
            }
            400 | 401 | 403 => Err(RefreshError::Rejected),
            _ => Err(RefreshError::ServerError(format!(
                "Status {}: {}",
                status,
                ApiError::truncate_body(&body)
            ))),
        }
    }
}

fn reject_all(waiters: VecDeque<Waiter>, error: RefreshError) {
    for waiter in waiters {
        let _ = waiter.send(Err(error.clone()));
    }
}
