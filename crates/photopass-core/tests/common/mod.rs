#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use photopass_core::auth::AuthTokens;
use photopass_core::config::Endpoints;
use photopass_core::{ApiClient, MemoryStore, SessionUser};
use reqwest::Client;
use wiremock::MockServer;

pub const REFRESH_PATH: &str = "/api/auth/token/refresh/";
pub const EVENTS_PATH: &str = "/api/events/";

/// Unsigned JWT expiring `secs` seconds from now (negative for the past).
pub fn jwt(secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(
        r#"{{"exp":{},"user_id":42,"token_type":"access"}}"#,
        Utc::now().timestamp() + secs
    ));
    format!("{}.{}.c2ln", header, payload)
}

pub fn photographer() -> SessionUser {
    SessionUser {
        id: "42".to_string(),
        display_name: "Ana Lens".to_string(),
        email: "ana@example.com".to_string(),
        is_photographer: true,
        is_staff: false,
        is_superuser: false,
    }
}

pub fn client_for(server: &MockServer) -> (ApiClient, Arc<MemoryStore>) {
    client_with(server, Endpoints::default(), Duration::from_secs(5))
}

pub fn client_with(
    server: &MockServer,
    endpoints: Endpoints,
    refresh_timeout: Duration,
) -> (ApiClient, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let api = ApiClient::with_client(
        Client::new(),
        &server.uri(),
        endpoints,
        refresh_timeout,
        store.clone(),
    );
    (api, store)
}

/// Seed a signed-in session with the given access and refresh tokens.
pub fn sign_in_locally(api: &ApiClient, access: &str, refresh: Option<&str>) {
    api.session()
        .establish(AuthTokens {
            access: access.to_string(),
            refresh: refresh.map(str::to_string),
            user: photographer(),
        })
        .expect("seeding the session should succeed");
}
