// Integration tests for Compute Client
//
// These tests drive the public API end to end against a mock compute server:
// login, transparent refresh, request encoding and the response cache.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use std::sync::Arc;

use compute_client::{
    auth::{self, AuthSession, Credentials},
    cache::ResponseCache,
    error::ClientError,
    http_client::RequestDispatcher,
    models::{HttpMethod, Operation, RequestSpec, ResponseBody},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

/// Unsigned JWT expiring `seconds` from now
fn token_expiring_in(seconds: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = json!({
        "token_type": "access",
        "exp": chrono::Utc::now().timestamp() + seconds,
        "jti": "5f1c",
        "user_id": 3
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{}.{}.c2lnbmF0dXJl", header, payload)
}

/// Session against the mock server with its own cache
fn create_session(server: &ServerGuard, cache: Arc<ResponseCache>) -> AuthSession {
    let dispatcher = Arc::new(
        RequestDispatcher::new(cache, 5, 5).expect("Failed to create dispatcher"),
    );
    AuthSession::new(Credentials::new(server.url(), "mark", "secret"), dispatcher)
}

/// Mock the login endpoint handing out the given tokens
async fn mock_login(server: &mut ServerGuard, body: Value) -> Mock {
    server
        .mock("POST", auth::LOGIN_PATH)
        .match_body(Matcher::Json(json!({"username": "mark", "password": "secret"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

// ==================================================================================================
// Login Tests
// ==================================================================================================

#[tokio::test]
async fn test_login_then_authenticated_request() {
    let mut server = Server::new_async().await;
    let access = token_expiring_in(600);
    let login = mock_login(&mut server, json!({"access": access, "refresh": "r-1"})).await;
    let tasks = server
        .mock("GET", "/api/task/")
        .match_header("authorization", format!("JWT {}", access).as_str())
        .with_status(200)
        .with_body(json!([{"uid": "t-1"}]).to_string())
        .create_async()
        .await;

    let session = create_session(&server, Arc::new(ResponseCache::new()));
    session.login().await.unwrap();

    let envelope = session.send(&RequestSpec::get("/api/task/")).await.unwrap();

    login.assert_async().await;
    tasks.assert_async().await;
    assert_eq!(envelope.json(), Some(&json!([{"uid": "t-1"}])));
}

#[tokio::test]
async fn test_login_missing_refresh_field() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server, json!({"access": token_expiring_in(600)})).await;

    let session = create_session(&server, Arc::new(ResponseCache::new()));
    let err = session.login().await.unwrap_err();

    assert!(matches!(err, ClientError::AuthError(_)));
    assert_eq!(session.access_token().await, None);
    assert!(!session.has_refresh_token().await);
}

#[tokio::test]
async fn test_login_non_json_response() {
    let mut server = Server::new_async().await;
    let _login = server
        .mock("POST", auth::LOGIN_PATH)
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create_async()
        .await;

    let session = create_session(&server, Arc::new(ResponseCache::new()));
    let err = session.login().await.unwrap_err();

    assert!(matches!(err, ClientError::AuthError(ref m) if m == "missing token field"));
}

#[tokio::test]
async fn test_relogin_starts_new_epoch() {
    let mut server = Server::new_async().await;
    let first = token_expiring_in(600);
    let login = mock_login(&mut server, json!({"access": first, "refresh": "r-1"})).await;

    let session = create_session(&server, Arc::new(ResponseCache::new()));
    session.login().await.unwrap();
    login.remove_async().await;

    let _failing = server
        .mock("POST", auth::LOGIN_PATH)
        .with_status(400)
        .with_body(json!({"detail": "bad credentials"}).to_string())
        .create_async()
        .await;

    assert!(session.login().await.is_err());
    // Nothing from the previous login survives a failed one
    assert_eq!(session.access_token().await, None);
    assert!(!session.has_refresh_token().await);
}

// ==================================================================================================
// Token Refresh Tests
// ==================================================================================================

#[tokio::test]
async fn test_expiring_token_refreshed_once_before_requests() {
    let mut server = Server::new_async().await;
    let expiring = token_expiring_in(5);
    let fresh = token_expiring_in(900);
    let _login = mock_login(&mut server, json!({"access": expiring, "refresh": "r-1"})).await;
    let refresh = server
        .mock("POST", auth::REFRESH_PATH)
        .match_body(Matcher::Json(json!({"refresh": "r-1"})))
        .with_status(200)
        .with_body(json!({"access": fresh}).to_string())
        .expect(1)
        .create_async()
        .await;
    let tasks = server
        .mock("GET", "/api/task/")
        .match_header("authorization", format!("JWT {}", fresh).as_str())
        .with_status(200)
        .with_body("[]")
        .expect(2)
        .create_async()
        .await;

    let session = create_session(&server, Arc::new(ResponseCache::new()));
    session.login().await.unwrap();

    session.send(&RequestSpec::get("/api/task/")).await.unwrap();
    session.send(&RequestSpec::get("/api/task/")).await.unwrap();

    refresh.assert_async().await;
    tasks.assert_async().await;
    assert_eq!(session.access_token().await, Some(fresh));
}

#[tokio::test]
async fn test_send_without_login_skips_refresh() {
    let mut server = Server::new_async().await;
    let refresh = server
        .mock("POST", auth::REFRESH_PATH)
        .expect(0)
        .create_async()
        .await;
    let health = server
        .mock("GET", "/api/health/")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let session = create_session(&server, Arc::new(ResponseCache::new()));
    let envelope = session.send(&RequestSpec::get("/api/health/")).await.unwrap();

    refresh.assert_async().await;
    health.assert_async().await;
    assert_eq!(envelope.body, ResponseBody::Raw("ok".to_string()));
}

#[tokio::test]
async fn test_failed_refresh_surfaces_error() {
    let mut server = Server::new_async().await;
    let _login = mock_login(
        &mut server,
        json!({"access": token_expiring_in(-60), "refresh": "r-1"}),
    )
    .await;
    let _refresh = server
        .mock("POST", auth::REFRESH_PATH)
        .with_status(401)
        .with_body(json!({"detail": "Token is blacklisted"}).to_string())
        .create_async()
        .await;
    let tasks = server
        .mock("GET", "/api/task/")
        .expect(0)
        .create_async()
        .await;

    let session = create_session(&server, Arc::new(ResponseCache::new()));
    session.login().await.unwrap();

    let err = session.send(&RequestSpec::get("/api/task/")).await.unwrap_err();

    assert!(matches!(err, ClientError::AuthError(_)));
    tasks.assert_async().await;
}

// ==================================================================================================
// Response Cache Tests
// ==================================================================================================

#[tokio::test]
async fn test_mutation_result_replayed_from_cache() {
    let mut server = Server::new_async().await;
    let _login = mock_login(
        &mut server,
        json!({"access": token_expiring_in(600), "refresh": "r-1"}),
    )
    .await;
    let create = server
        .mock("POST", "/api/task/")
        .match_query(Matcher::UrlEncoded("dry_run".into(), "1".into()))
        .with_status(201)
        .with_body(json!({"uid": "t-42", "status": "pending"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let session = create_session(&server, Arc::new(ResponseCache::new()));
    session.login().await.unwrap();

    let spec = RequestSpec::post("/api/task/", json!({"config": {"task_type": "empty"}}))
        .query("dry_run", "1");
    let sent = session.send(&spec).await.unwrap();

    // Replay does not touch the server
    let replayed = session.send_cached(&spec).unwrap();
    let replayed_again = session.send_cached(&spec).unwrap();

    create.assert_async().await;
    assert_eq!(
        serde_json::to_vec(&sent).unwrap(),
        serde_json::to_vec(&replayed).unwrap()
    );
    assert_eq!(replayed, replayed_again);

    // A different query string is a different key
    assert!(session.send_cached(&RequestSpec::post("/api/task/", json!({}))).is_none());
}

#[tokio::test]
async fn test_cache_outlives_session() {
    let mut server = Server::new_async().await;
    let _login = mock_login(
        &mut server,
        json!({"access": token_expiring_in(600), "refresh": "r-1"}),
    )
    .await;
    let _update = server
        .mock("PUT", "/api/task/t-1/")
        .with_status(200)
        .with_body(json!({"uid": "t-1", "status": "running"}).to_string())
        .create_async()
        .await;

    let cache = Arc::new(ResponseCache::new());
    let spec = RequestSpec::for_operation(Operation::Update, "/api/task/t-1/")
        .body(json!({"config": {"cmd": "run"}}));

    {
        let session = create_session(&server, cache.clone());
        session.login().await.unwrap();
        session.send(&spec).await.unwrap();
    }

    let later = create_session(&server, cache.clone());
    let cached = later.send_cached(&spec).unwrap();
    assert_eq!(cached.get("status"), Some(&json!("running")));
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_auth_responses_not_cached() {
    let mut server = Server::new_async().await;
    let _login = mock_login(
        &mut server,
        json!({"access": token_expiring_in(600), "refresh": "r-1"}),
    )
    .await;

    let cache = Arc::new(ResponseCache::new());
    let session = create_session(&server, cache.clone());
    session.login().await.unwrap();

    assert!(cache.is_empty());
}

// ==================================================================================================
// Request Encoding Tests
// ==================================================================================================

#[tokio::test]
async fn test_get_never_carries_body() {
    let mut server = Server::new_async().await;
    let _login = mock_login(
        &mut server,
        json!({"access": token_expiring_in(600), "refresh": "r-1"}),
    )
    .await;
    let read = server
        .mock("GET", "/api/task/t-1/")
        .match_body(Matcher::Exact(String::new()))
        .with_status(200)
        .with_body(json!({"uid": "t-1"}).to_string())
        .create_async()
        .await;
    let wrongly_posted = server
        .mock("POST", "/api/task/t-1/")
        .expect(0)
        .create_async()
        .await;

    let session = create_session(&server, Arc::new(ResponseCache::new()));
    session.login().await.unwrap();

    let spec = RequestSpec::for_operation(Operation::Read, "/api/task/t-1/")
        .body(json!({"config": {"cpus": [1, 1, 1]}}));
    assert_eq!(spec.method, HttpMethod::Get);
    session.send(&spec).await.unwrap();

    read.assert_async().await;
    wrongly_posted.assert_async().await;
}

#[tokio::test]
async fn test_file_upload_sent_raw() {
    let mut server = Server::new_async().await;
    let _login = mock_login(
        &mut server,
        json!({"access": token_expiring_in(600), "refresh": "r-1"}),
    )
    .await;
    let upload = server
        .mock("PUT", "/api/task/t-1/file/foam/constant/g/")
        .match_header("content-disposition", "attachment; filename=g")
        .match_body(Matcher::Exact("dimensions [0 1 -2 0 0 0 0];".to_string()))
        .with_status(201)
        .with_body(json!({"file": "foam/constant/g"}).to_string())
        .create_async()
        .await;

    let session = create_session(&server, Arc::new(ResponseCache::new()));
    session.login().await.unwrap();

    let spec = RequestSpec::new(HttpMethod::Put, "/api/task/t-1/file/foam/constant/g/")
        .raw(b"dimensions [0 1 -2 0 0 0 0];".to_vec())
        .header("Content-Disposition", "attachment; filename=g");
    let envelope = session.send(&spec).await.unwrap();

    upload.assert_async().await;
    assert!(envelope.is_success());
}

#[tokio::test]
async fn test_server_error_reported_as_data() {
    let mut server = Server::new_async().await;
    let _login = mock_login(
        &mut server,
        json!({"access": token_expiring_in(600), "refresh": "r-1"}),
    )
    .await;
    let _boom = server
        .mock("POST", "/api/task/")
        .with_status(500)
        .with_body("Internal Server Error")
        .create_async()
        .await;

    let session = create_session(&server, Arc::new(ResponseCache::new()));
    session.login().await.unwrap();

    let envelope = session
        .send(&RequestSpec::post("/api/task/", json!({"config": {}})))
        .await
        .unwrap();

    let failure = envelope.error.as_ref().unwrap();
    assert_eq!(failure.status, Some(500));
    assert_eq!(failure.reason, "Internal Server Error");
    assert_eq!(
        envelope.body,
        ResponseBody::Raw("Internal Server Error".to_string())
    );
}
