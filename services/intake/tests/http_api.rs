use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use beacon_intake::config::{ApiConfig, StorageConfig};
use beacon_intake::{create_router, AppState, FileStorage, IngestionService, SubmissionStore};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::assert_ok;
use tower::ServiceExt;

struct Harness {
    _dir: TempDir,
    storage: Arc<FileStorage>,
    router: Router,
}

async fn harness() -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let config = StorageConfig {
        data_dir: dir.path().join("data"),
        ..Default::default()
    };
    let storage = Arc::new(FileStorage::open(&config).await.expect("open storage"));
    let state = AppState {
        ingestion: IngestionService::new(storage.clone()),
    };
    let router = create_router(state, &ApiConfig::default());

    Harness {
        _dir: dir,
        storage,
        router,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: &'static str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("build request");

    router.clone().oneshot(request).await.expect("router call")
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes()
        .to_vec()
}

async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

fn assert_common_headers(response: &Response<Body>) {
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET,POST,OPTIONS");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
    assert_eq!(headers[header::CONTENT_TYPE], "application/json; charset=utf-8");
}

#[tokio::test]
async fn send_message_persists_entry() {
    let h = harness().await;
    let start = chrono::Utc::now();

    let response = send(
        &h.router,
        "POST",
        "/send-message",
        r#"{"name":"Ana","email":"a@x.com","message":"hello"}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_common_headers(&response);
    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    let id = body["id"].as_i64().expect("numeric id");

    let messages = assert_ok!(h.storage.load_messages().await);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, id);
    assert_eq!(messages[0].name, "Ana");
    assert_eq!(messages[0].email, "a@x.com");
    assert_eq!(messages[0].message, "hello");
    assert!(messages[0].received_at.timestamp_millis() >= start.timestamp_millis());
}

#[tokio::test]
async fn send_message_ids_are_fresh() {
    let h = harness().await;
    let payload = r#"{"name":"Ana","email":"a@x.com","message":"hello"}"#;

    let mut ids = Vec::new();
    for _ in 0..5 {
        let body = body_json(send(&h.router, "POST", "/send-message", payload).await).await;
        ids.push(body["id"].as_i64().expect("numeric id"));
    }

    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(assert_ok!(h.storage.load_messages().await).len(), 5);
}

#[tokio::test]
async fn send_message_missing_field_is_422() {
    let h = harness().await;

    let response = send(
        &h.router,
        "POST",
        "/send-message",
        r#"{"name":"A","email":"","message":"hi"}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_common_headers(&response);
    assert_eq!(body_json(response).await["error"], "Missing fields");
    assert!(assert_ok!(h.storage.load_messages().await).is_empty());
}

#[tokio::test]
async fn send_message_empty_body_is_422() {
    let h = harness().await;

    let response = send(&h.router, "POST", "/send-message", "").await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn malformed_json_is_400_on_both_endpoints() {
    let h = harness().await;

    for uri in ["/send-message", "/track"] {
        let response = send(&h.router, "POST", uri, "{").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_common_headers(&response);
        assert_eq!(body_json(response).await["error"], "Invalid JSON");
    }

    assert!(assert_ok!(h.storage.load_messages().await).is_empty());
    assert!(assert_ok!(h.storage.analytics().read_events().await).is_empty());
}

#[tokio::test]
async fn track_appends_one_line() {
    let h = harness().await;

    let response = send(
        &h.router,
        "POST",
        "/track",
        r#"{"event":"cta_click","details":{"cta":"donate_nav"}}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_common_headers(&response);
    assert_eq!(body_json(response).await, serde_json::json!({"ok": true}));

    let raw = std::fs::read_to_string(h.storage.analytics().path()).expect("analytics log");
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("\"cta_click\""));

    let events = assert_ok!(h.storage.analytics().read_events().await);
    assert_eq!(events[0].details().expect("details")["cta"], "donate_nav");
}

#[tokio::test]
async fn track_accepts_empty_body() {
    let h = harness().await;

    let response = send(&h.router, "POST", "/track", "").await;
    assert_eq!(response.status(), StatusCode::OK);

    let events = assert_ok!(h.storage.analytics().read_events().await);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload, serde_json::json!({}));
}

#[tokio::test]
async fn health_is_ok_and_stateless() {
    let h = harness().await;

    for _ in 0..3 {
        let response = send(&h.router, "GET", "/health", "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_common_headers(&response);

        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        let now = body["now"].as_str().expect("timestamp string");
        assert!(beacon_intake::timestamp::parse_iso(now).is_ok());
        assert!(now.ends_with('Z'));
    }

    assert!(assert_ok!(h.storage.load_messages().await).is_empty());
    assert!(!h.storage.analytics().path().exists());
}

#[tokio::test]
async fn options_is_preflight_everywhere() {
    let h = harness().await;

    for uri in ["/send-message", "/track", "/health", "/nowhere"] {
        let response = send(&h.router, "OPTIONS", uri, "").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT, "{uri}");
        assert_common_headers(&response);
        assert!(body_bytes(response).await.is_empty());
    }
}

#[tokio::test]
async fn wrong_method_is_405_with_allow() {
    let h = harness().await;

    let response = send(&h.router, "GET", "/send-message", "").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_common_headers(&response);
    let allow = response.headers()[header::ALLOW].to_str().expect("allow");
    assert!(allow.contains("POST"));

    let response = send(&h.router, "POST", "/health", "").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let allow = response.headers()[header::ALLOW].to_str().expect("allow");
    assert!(allow.contains("GET"));
}

#[tokio::test]
async fn unknown_route_is_404() {
    let h = harness().await;

    let response = send(&h.router, "GET", "/messages", "").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_common_headers(&response);
    assert_eq!(body_json(response).await["error"], "Not found");
}

#[tokio::test]
async fn api_prefixed_aliases_reach_same_handlers() {
    let h = harness().await;

    let response = send(
        &h.router,
        "POST",
        "/api/send-message",
        r#"{"name":"Ana","email":"a@x.com","message":"hello"}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&h.router, "POST", "/api/track", r#"{"event":"page_view"}"#).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(assert_ok!(h.storage.load_messages().await).len(), 1);
    assert_eq!(assert_ok!(h.storage.analytics().read_events().await).len(), 1);
}

#[tokio::test]
async fn aliases_can_be_disabled() {
    let dir = TempDir::new().expect("temp dir");
    let config = StorageConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let storage = Arc::new(FileStorage::open(&config).await.expect("open storage"));
    let api = ApiConfig {
        route_prefix_aliases: false,
        ..Default::default()
    };
    let router = create_router(
        AppState {
            ingestion: IngestionService::new(storage),
        },
        &api,
    );

    let response = send(&router, "POST", "/api/track", "{}").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn storage_failure_is_500() {
    let h = harness().await;
    // A directory in place of the document makes every read fail
    let path = h.storage.messages().path().to_path_buf();
    std::fs::remove_file(&path).expect("remove document");
    std::fs::create_dir(&path).expect("create blocking dir");

    let response = send(
        &h.router,
        "POST",
        "/send-message",
        r#"{"name":"Ana","email":"a@x.com","message":"hello"}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_common_headers(&response);
    assert_eq!(body_json(response).await["error"], "Storage failure");
}

async fn send_bytes(router: &Router, uri: &str, body: Vec<u8>) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("build request");

    router.clone().oneshot(request).await.expect("router call")
}

fn large_submission(message_len: usize) -> Vec<u8> {
    let payload = serde_json::json!({
        "name": "Ana",
        "email": "a@x.com",
        "message": "x".repeat(message_len),
    });
    serde_json::to_vec(&payload).expect("encode payload")
}

#[tokio::test]
async fn track_logs_payload_in_client_order() {
    let h = harness().await;

    let response = send(
        &h.router,
        "POST",
        "/track",
        r#"{"event":"cta_click","details":{"cta":"donate_nav"},"n":1.0}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let raw = std::fs::read_to_string(h.storage.analytics().path()).expect("analytics log");
    let (_, json) = raw.trim_end().split_once(' ').expect("timestamp prefix");
    assert_eq!(json, r#"{"event":"cta_click","details":{"cta":"donate_nav"},"n":1.0}"#);
}

#[tokio::test]
async fn large_submission_is_accepted_without_limit() {
    let h = harness().await;

    let response = send_bytes(&h.router, "/send-message", large_submission(3 * 1024 * 1024)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_common_headers(&response);
    let messages = assert_ok!(h.storage.load_messages().await);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message.len(), 3 * 1024 * 1024);
}

#[tokio::test]
async fn configured_body_limit_rejects_with_json() {
    let dir = TempDir::new().expect("temp dir");
    let config = StorageConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let storage = Arc::new(FileStorage::open(&config).await.expect("open storage"));
    let api = ApiConfig {
        max_body_bytes: Some(1024),
        ..Default::default()
    };
    let router = create_router(
        AppState {
            ingestion: IngestionService::new(storage.clone()),
        },
        &api,
    );

    let response = send_bytes(&router, "/send-message", large_submission(4096)).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_common_headers(&response);
    assert_eq!(body_json(response).await["error"], "Payload too large");
    assert!(assert_ok!(storage.load_messages().await).is_empty());

    let response = send_bytes(&router, "/send-message", large_submission(16)).await;
    assert_eq!(response.status(), StatusCode::OK);
}
