mod common;

use std::time::Duration;

use futures::future::join_all;
use photopass_core::config::Endpoints;
use photopass_core::storage::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_USER_KEY};
use photopass_core::{ApiError, AuthState, RefreshError, SessionStore, SignOutReason};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{client_for, client_with, jwt, sign_in_locally, EVENTS_PATH, REFRESH_PATH};

async fn mount_events_ok_for(server: &MockServer, bearer: &str) {
    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(header("authorization", format!("Bearer {}", bearer).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1, "name": "Spring Gala" }])))
        .with_priority(1)
        .mount(server)
        .await;
}

async fn mount_events_unauthorized(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "detail": "Token expired" })))
        .with_priority(10)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_valid_token_is_sent_as_bearer() {
    let server = MockServer::start().await;
    let (api, _store) = client_for(&server);
    let token = jwt(300);
    sign_in_locally(&api, &token, Some("r1"));

    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(header("authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let events: Vec<Value> = api.get(EVENTS_PATH).await.unwrap();
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_missing_token_sends_no_credential() {
    let server = MockServer::start().await;
    let (api, _store) = client_for(&server);

    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let _: Vec<Value> = api.get(EVENTS_PATH).await.unwrap();
    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    let (api, store) = client_for(&server);
    sign_in_locally(&api, "tok1", Some("r1"));

    mount_events_ok_for(&server, "tok2").await;
    mount_events_unauthorized(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({ "refresh": "r1" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access": "tok2" }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let calls = (0..5).map(|_| api.get::<Vec<Value>>(EVENTS_PATH));
    let results = join_all(calls).await;
    for result in results {
        let events = result.expect("request should succeed after refresh");
        assert_eq!(events.len(), 1);
    }

    assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("tok2"));
    // No rotation returned, so the original refresh token stays
    assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));
    assert!(!api.session().refresh_in_flight());

    let requests = server.received_requests().await.unwrap();
    let refreshes: Vec<_> = requests.iter().filter(|r| r.url.path() == REFRESH_PATH).collect();
    assert_eq!(refreshes.len(), 1);
    assert!(refreshes[0].headers.get("authorization").is_none());

    let retried_with_tok2 = requests
        .iter()
        .filter(|r| r.url.path() == EVENTS_PATH)
        .filter(|r| r.headers.get("authorization").map(|v| v == "Bearer tok2").unwrap_or(false))
        .count();
    assert_eq!(retried_with_tok2, 5);
}

#[tokio::test]
async fn test_two_simultaneous_calls_retry_with_new_token() {
    let server = MockServer::start().await;
    let (api, _store) = client_for(&server);
    sign_in_locally(&api, "tok1", Some("r1"));

    mount_events_ok_for(&server, "tok2").await;
    mount_events_unauthorized(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access": "tok2" }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (a, b) = tokio::join!(
        api.get::<Vec<Value>>(EVENTS_PATH),
        api.get::<Vec<Value>>(EVENTS_PATH)
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
}

#[tokio::test]
async fn test_second_401_is_not_retried_again() {
    let server = MockServer::start().await;
    let (api, _store) = client_for(&server);
    sign_in_locally(&api, "tok1", Some("r1"));

    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access": "tok2" })))
        .expect(1)
        .mount(&server)
        .await;

    let result = api.get::<Vec<Value>>(EVENTS_PATH).await;
    assert!(matches!(result, Err(ApiError::Unauthorized)));
}

#[tokio::test]
async fn test_refresh_rejection_clears_session() {
    let server = MockServer::start().await;
    let (api, store) = client_for(&server);
    sign_in_locally(&api, "tok1", Some("r1"));
    let mut auth_rx = api.session().subscribe();

    mount_events_unauthorized(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({ "detail": "Token is blacklisted" }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (a, b) = tokio::join!(
        api.get::<Vec<Value>>(EVENTS_PATH),
        api.get::<Vec<Value>>(EVENTS_PATH)
    );
    for result in [a, b] {
        let err = result.unwrap_err();
        assert!(matches!(err, ApiError::Refresh(RefreshError::Rejected)));
        assert!(err.requires_sign_in());
    }

    for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_USER_KEY] {
        assert!(store.get(key).is_none(), "{} should be cleared", key);
    }
    assert!(!api.session().is_authenticated());
    assert!(auth_rx.has_changed().unwrap());
    assert_eq!(
        *auth_rx.borrow_and_update(),
        AuthState::SignedOut(SignOutReason::RefreshRejected)
    );
}

#[tokio::test]
async fn test_refresh_network_error_preserves_credentials() {
    let server = MockServer::start().await;
    // Nothing listens on port 1, so the refresh call never gets a response
    let endpoints = Endpoints {
        refresh: "http://127.0.0.1:1/api/auth/token/refresh/".to_string(),
        ..Endpoints::default()
    };
    let (api, store) = client_with(&server, endpoints, Duration::from_secs(5));
    let access = jwt(-60);
    sign_in_locally(&api, &access, Some("r1"));

    mount_events_unauthorized(&server).await;

    let err = api.get::<Vec<Value>>(EVENTS_PATH).await.unwrap_err();
    assert!(matches!(err, ApiError::Refresh(RefreshError::Transport(_))));
    assert!(!err.requires_sign_in());

    assert_eq!(store.get(ACCESS_TOKEN_KEY), Some(access));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));
    assert!(store.get(SESSION_USER_KEY).is_some());
    assert!(!api.session().refresh_in_flight());
}

#[tokio::test]
async fn test_refresh_timeout_preserves_credentials() {
    let server = MockServer::start().await;
    let (api, store) = client_with(&server, Endpoints::default(), Duration::from_millis(100));
    sign_in_locally(&api, "tok1", Some("r1"));

    mount_events_unauthorized(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access": "tok2" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = api.get::<Vec<Value>>(EVENTS_PATH).await.unwrap_err();
    assert!(matches!(err, ApiError::Refresh(RefreshError::Timeout)));
    assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("tok1"));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));
}

#[tokio::test]
async fn test_refresh_server_error_preserves_credentials() {
    let server = MockServer::start().await;
    let (api, store) = client_for(&server);
    sign_in_locally(&api, "tok1", Some("r1"));

    mount_events_unauthorized(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let err = api.get::<Vec<Value>>(EVENTS_PATH).await.unwrap_err();
    assert!(matches!(err, ApiError::Refresh(RefreshError::ServerError(_))));
    assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("tok1"));
}

#[tokio::test]
async fn test_rotated_refresh_token_is_persisted() {
    let server = MockServer::start().await;
    let (api, store) = client_for(&server);
    sign_in_locally(&api, "tok1", Some("r1"));

    mount_events_ok_for(&server, "tok2").await;
    mount_events_unauthorized(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access": "tok2", "refresh": "r2" })))
        .expect(1)
        .mount(&server)
        .await;

    let _: Vec<Value> = api.get(EVENTS_PATH).await.unwrap();
    let credentials = api.session().credentials().unwrap();
    assert_eq!(credentials.access_token, "tok2");
    assert_eq!(credentials.refresh_token.as_deref(), Some("r2"));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("r2"));
}

#[tokio::test]
async fn test_malformed_refresh_body_clears_session() {
    let server = MockServer::start().await;
    let (api, store) = client_for(&server);
    sign_in_locally(&api, "tok1", Some("r1"));

    mount_events_unauthorized(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "wrong-shape" })))
        .mount(&server)
        .await;

    let err = api.get::<Vec<Value>>(EVENTS_PATH).await.unwrap_err();
    assert!(matches!(err, ApiError::Refresh(RefreshError::InvalidResponse(_))));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_sign_out_cancels_queued_requests() {
    let server = MockServer::start().await;
    let (api, store) = client_for(&server);
    sign_in_locally(&api, "tok1", Some("r1"));

    mount_events_unauthorized(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access": "tok2", "refresh": "r2" }))
                .set_delay(Duration::from_millis(400)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let first = tokio::spawn({
        let api = api.clone();
        async move { api.get::<Vec<Value>>(EVENTS_PATH).await }
    });
    let second = tokio::spawn({
        let api = api.clone();
        async move { api.get::<Vec<Value>>(EVENTS_PATH).await }
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(api.session().refresh_in_flight());
    api.sign_out();

    for handle in [first, second] {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ApiError::Refresh(RefreshError::Cancelled)));
    }
    assert!(!api.session().is_authenticated());

    // The refresh settles after sign-out and must not resurrect the session
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(store.is_empty());
    assert_eq!(
        api.session().auth_state(),
        AuthState::SignedOut(SignOutReason::UserRequested)
    );
}

#[tokio::test]
async fn test_other_errors_pass_through_without_refresh() {
    let server = MockServer::start().await;
    let (api, _store) = client_for(&server);
    sign_in_locally(&api, "tok1", Some("r1"));

    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access": "tok2" })))
        .expect(0)
        .mount(&server)
        .await;

    let err = api.get::<Vec<Value>>(EVENTS_PATH).await.unwrap_err();
    assert!(matches!(err, ApiError::ServerError(ref body) if body == "boom"));
}

#[tokio::test]
async fn test_expired_token_is_not_authenticated_without_network() {
    let server = MockServer::start().await;
    let (api, store) = client_for(&server);
    sign_in_locally(&api, &jwt(-1), Some("r1"));

    assert!(!api.session().is_authenticated());
    assert!(store.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sign_in_during_refresh_supersedes_waiters() {
    let server = MockServer::start().await;
    let (api, store) = client_for(&server);
    sign_in_locally(&api, "tok1", Some("r1"));

    mount_events_unauthorized(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access": "refreshed", "refresh": "r-refreshed" }))
                .set_delay(Duration::from_millis(400)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let first = tokio::spawn({
        let api = api.clone();
        async move { api.get::<Vec<Value>>(EVENTS_PATH).await }
    });
    let second = tokio::spawn({
        let api = api.clone();
        async move { api.get::<Vec<Value>>(EVENTS_PATH).await }
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(api.session().refresh_in_flight());

    let fresh = jwt(600);
    sign_in_locally(&api, &fresh, Some("r-new"));
    assert!(!api.session().refresh_in_flight());

    for handle in [first, second] {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ApiError::Refresh(RefreshError::Superseded)));
        assert!(!err.requires_sign_in());
    }

    // The late refresh result must not overwrite the new session
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.get(ACCESS_TOKEN_KEY), Some(fresh));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("r-new"));
    assert!(api.session().is_authenticated());
}

#[tokio::test]
async fn test_late_401_for_replaced_token_skips_refresh() {
    let server = MockServer::start().await;
    let (api, store) = client_for(&server);
    sign_in_locally(&api, "tok1", Some("r1"));

    mount_events_ok_for(&server, "tok2").await;
    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(300)))
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access": "tok3" })))
        .expect(0)
        .mount(&server)
        .await;

    let pending = tokio::spawn({
        let api = api.clone();
        async move { api.get::<Vec<Value>>(EVENTS_PATH).await }
    });

    // Another request refreshed the session while this one was in flight
    tokio::time::sleep(Duration::from_millis(100)).await;
    store.set(ACCESS_TOKEN_KEY, "tok2").unwrap();

    let events = pending.await.unwrap().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("tok2"));
}
