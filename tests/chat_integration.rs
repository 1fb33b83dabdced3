//! End-to-end tests over the HTTP surface with an instant mock token source.

use std::sync::Arc;

use axum_test::TestServer;
use serde_json::{Value, json};

use chat_stream::config::{AppConfig, ResilienceConfig, ServerConfig, SourceConfig};
use chat_stream::server::build_router;
use chat_stream::session::SessionStore;
use chat_stream::source::MockTokenSource;
use chat_stream::AppState;

fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            port: 0,
            host: "127.0.0.1".to_string(),
        },
        resilience: ResilienceConfig {
            timeout_disabled: true,
            request_timeout_secs: 30,
        },
        source: SourceConfig { mock: true },
    }
}

fn test_server() -> TestServer {
    let state = AppState {
        sessions: SessionStore::new(),
        source: Arc::new(MockTokenSource::instant()),
        config: Arc::new(test_config()),
    };
    TestServer::new(build_router(state)).expect("test server")
}

#[tokio::test]
async fn test_chat_returns_session_and_stream_url() {
    let server = test_server();

    let resp = server
        .post("/api/chat")
        .json(&json!({ "message": "Hello" }))
        .await;
    resp.assert_status_ok();

    let body: Value = resp.json();
    let session_id = body["session_id"].as_str().expect("session id");
    assert!(!session_id.is_empty());
    assert_eq!(
        body["stream_url"].as_str(),
        Some(format!("/api/chat/stream?session_id={session_id}").as_str())
    );
}

#[tokio::test]
async fn test_empty_message_opens_no_stream() {
    let server = test_server();

    let resp = server
        .post("/api/chat")
        .json(&json!({ "message": "   " }))
        .await;
    resp.assert_status_ok();

    let body: Value = resp.json();
    assert!(body["stream_url"].is_null());

    // Nothing was committed to history either.
    let session_id = body["session_id"].as_str().unwrap();
    let messages: Value = server
        .get(&format!("/api/sessions/{session_id}/messages"))
        .await
        .json();
    assert_eq!(messages.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_stream_emits_ordered_events() {
    let server = test_server();

    let body: Value = server
        .post("/api/chat")
        .json(&json!({ "message": "Hello" }))
        .await
        .json();
    let stream_url = body["stream_url"].as_str().unwrap().to_string();

    let stream = server.get(&stream_url).await;
    stream.assert_status_ok();
    assert_eq!(
        stream.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let text = stream.text();
    let sent = text.find("event: message.sent").expect("message.sent");
    let first_token = text.find("event: token.new").expect("token.new");
    let done = text.find("event: tokens.done").expect("tokens.done");
    assert!(sent < first_token);
    assert!(first_token < done);

    // Terminal event appears exactly once.
    assert_eq!(text.matches("event: tokens.done").count(), 1);
}

#[tokio::test]
async fn test_reply_committed_to_history_after_stream() {
    let server = test_server();

    let body: Value = server
        .post("/api/chat")
        .json(&json!({ "message": "Hello" }))
        .await
        .json();
    let session_id = body["session_id"].as_str().unwrap().to_string();
    let stream_url = body["stream_url"].as_str().unwrap().to_string();

    let _ = server.get(&stream_url).await;

    let messages: Value = server
        .get(&format!("/api/sessions/{session_id}/messages"))
        .await
        .json();
    let messages = messages.as_array().expect("history array");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "Hello");
    assert_eq!(messages[1]["role"], "assistant");
    // The full reply lands in history regardless of display flushes.
    let reply = messages[1]["content"].as_str().unwrap();
    assert!(reply.starts_with("Good morning"));
    assert!(reply.contains("winter evenings"));
}

#[tokio::test]
async fn test_transcript_fragment_renders_messages() {
    let server = test_server();

    let body: Value = server
        .post("/api/chat")
        .json(&json!({ "message": "Hello" }))
        .await
        .json();
    let session_id = body["session_id"].as_str().unwrap().to_string();
    let stream_url = body["stream_url"].as_str().unwrap().to_string();
    let _ = server.get(&stream_url).await;

    let fragment = server
        .get(&format!("/api/sessions/{session_id}/transcript"))
        .await;
    fragment.assert_status_ok();

    let html = fragment.text();
    assert!(html.contains(r#"id="messages""#));
    assert!(html.contains("sender-header"));
    assert!(html.contains("Hello"));
    assert!(html.contains("Good morning"));
    // No unfinished streaming message remains after the terminal event.
    assert!(!html.contains("streaming"));
}

#[tokio::test]
async fn test_stream_for_unknown_session_is_error_sse() {
    let server = test_server();

    let resp = server.get("/api/chat/stream?session_id=nope").await;
    resp.assert_status_ok();

    let text = resp.text();
    assert!(text.contains("event: error"));
    assert!(text.contains("Session not found"));
    assert!(text.contains("event: tokens.done"));
}

#[tokio::test]
async fn test_system_message_appears_in_transcript() {
    let server = test_server();

    let created: Value = server.post("/api/sessions").await.json();
    let session_id = created["id"].as_str().unwrap().to_string();

    server
        .post(&format!("/api/sessions/{session_id}/system"))
        .json(&json!({ "content": "Session restored" }))
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);

    let html = server
        .get(&format!("/api/sessions/{session_id}/transcript"))
        .await
        .text();
    assert!(html.contains("Session restored"));
    assert!(html.contains("System"));
}

#[tokio::test]
async fn test_clear_wipes_transcript_and_history() {
    let server = test_server();

    let body: Value = server
        .post("/api/chat")
        .json(&json!({ "message": "Hello" }))
        .await
        .json();
    let session_id = body["session_id"].as_str().unwrap().to_string();
    let stream_url = body["stream_url"].as_str().unwrap().to_string();
    let _ = server.get(&stream_url).await;

    server
        .delete(&format!("/api/sessions/{session_id}/messages"))
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);

    let messages: Value = server
        .get(&format!("/api/sessions/{session_id}/messages"))
        .await
        .json();
    assert_eq!(messages.as_array().map(Vec::len), Some(0));

    let html = server
        .get(&format!("/api/sessions/{session_id}/transcript"))
        .await
        .text();
    assert!(!html.contains("message-group"));
}

#[tokio::test]
async fn test_viewport_report_accepted() {
    let server = test_server();

    let created: Value = server.post("/api/sessions").await.json();
    let session_id = created["id"].as_str().unwrap().to_string();

    server
        .post(&format!("/api/sessions/{session_id}/viewport"))
        .json(&json!({ "scroll_top": 0, "scroll_height": 1000, "client_height": 400 }))
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_session_crud() {
    let server = test_server();

    let created: Value = server.post("/api/sessions").await.json();
    let session_id = created["id"].as_str().unwrap().to_string();
    let created_at = created["created_at"].as_str().expect("created_at");
    assert!(chrono::DateTime::parse_from_rfc3339(created_at).is_ok());

    let listed: Value = server.get("/api/sessions").await.json();
    assert!(
        listed
            .as_array()
            .unwrap()
            .iter()
            .any(|s| s["id"] == session_id.as_str())
    );

    let fetched = server.get(&format!("/api/sessions/{session_id}")).await;
    fetched.assert_status_ok();

    server
        .delete(&format!("/api/sessions/{session_id}"))
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);

    server
        .get(&format!("/api/sessions/{session_id}"))
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_index_page_serves_shell() {
    let server = test_server();

    let resp = server.get("/").await;
    resp.assert_status_ok();
    let html = resp.text();
    assert!(html.contains("<!DOCTYPE html>"));
    assert!(html.contains("composer"));
}
