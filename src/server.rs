use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::events::{StreamEvent, sse_event};
use crate::session::DEFAULT_SESSION_TIMEOUT;
use crate::source::TokenSource;
use crate::transcript::{Transcript, worker};

/// How often the expired-session sweep runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Depth of the channel between the token source and the worker.
const SOURCE_BUFFER: usize = 32;

/// Start the Axum server with the provided configuration.
pub async fn start_server(
    config: Arc<AppConfig>,
    source: Arc<dyn TokenSource>,
) -> anyhow::Result<()> {
    let state = AppState {
        sessions: crate::session::SessionStore::new(),
        source,
        config: Arc::clone(&config),
    };

    // Background sweep for inactive sessions.
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            let removed = sessions.cleanup_expired_with_timeout(DEFAULT_SESSION_TIMEOUT);
            if removed > 0 {
                info!(removed, "cleaned up expired sessions");
            }
        }
    });

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Build the application router with all middleware applied.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    // Router::layer changes the router type, so conditional layering does
    // not compose. A huge duration stands in for "disabled" instead.
    let timeout_duration = if state.config.resilience.timeout_disabled {
        Duration::from_secs(365 * 24 * 60 * 60)
    } else {
        Duration::from_secs(state.config.resilience.request_timeout_secs)
    };

    Router::new()
        .route("/", get(index_handler))
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", get(api_chat_stream))
        .route("/api/sessions", get(api_list_sessions).post(api_create_session))
        .route("/api/sessions/{id}", get(api_get_session).delete(api_delete_session))
        .route(
            "/api/sessions/{id}/messages",
            get(api_get_messages).delete(api_clear_messages),
        )
        .route("/api/sessions/{id}/transcript", get(api_get_transcript))
        .route("/api/sessions/{id}/system", post(api_add_system_message))
        .route("/api/sessions/{id}/viewport", post(api_report_viewport))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| {
                let duration = timeout_duration;
                async move {
                    match tokio::time::timeout(duration, next.run(req)).await {
                        Ok(res) => res,
                        Err(_) => {
                            (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response()
                        }
                    }
                }
            },
        ))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// User message content.
    message: String,
    /// Optional session ID (creates new if not provided).
    #[serde(default)]
    session_id: Option<String>,
}

/// Response from chat API.
#[derive(Debug, Serialize)]
struct ChatResponse {
    /// Session ID for this conversation.
    session_id: String,
    /// URL for the SSE stream; absent when no message was accepted.
    stream_url: Option<String>,
}

/// Query parameters for the stream endpoint.
#[derive(Debug, Deserialize)]
struct StreamQuery {
    /// Session ID.
    session_id: String,
}

/// POST /api/chat - Commit a user message and get the stream URL.
async fn api_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Json<ChatResponse> {
    tracing::info!(
        message_length = req.message.len(),
        session_id = ?req.session_id,
        "Received chat request"
    );

    let session = match req.session_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => state.sessions.get_or_create(id),
        None => {
            let session = state.sessions.create();
            tracing::debug!(session_id = %session.id(), "Created new session");
            session
        }
    };

    let session_id = session.id().to_string();

    // A whitespace-only message commits nothing and opens no stream.
    if req.message.trim().is_empty() {
        session.with_transcript(|t| t.append_user_message(&req.message, "You"));
        return Json(ChatResponse {
            session_id,
            stream_url: None,
        });
    }

    session.push_user_message(req.message.trim());
    session.with_transcript(|t| t.append_user_message(&req.message, "You"));

    let stream_url = format!("/api/chat/stream?session_id={session_id}");

    Json(ChatResponse {
        session_id,
        stream_url: Some(stream_url),
    })
}

/// GET /api/chat/stream - SSE stream of token events for one reply.
async fn api_chat_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    tracing::info!(session_id = %query.session_id, "Starting SSE stream");

    let Some(session) = state.sessions.get(&query.session_id) else {
        tracing::error!(session_id = %query.session_id, "Session not found");
        return single_error_sse("Session not found");
    };

    let history = session.history();
    let source = Arc::clone(&state.source);

    // Pump the source's event stream into the worker's inbox. The worker is
    // the single consumer; this SSE response only mirrors what it forwards.
    let (tx, rx) = mpsc::channel(SOURCE_BUFFER);
    tokio::spawn(async move {
        let mut stream = source.stream(history).await;
        while let Some(event) = stream.next().await {
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });

    let forwarded = worker::spawn(session, rx);

    let sse_stream = ReceiverStream::new(forwarded)
        .map(|event| Ok::<String, Infallible>(sse_event(&event)));

    let body = axum::body::Body::from_stream(sse_stream);
    build_sse_response(body)
}

/// Session info for listing.
#[derive(Debug, Serialize)]
struct SessionInfo {
    id: String,
    message_count: usize,
    created_at: String,
}

impl SessionInfo {
    fn from_session(session: &crate::session::Session) -> Self {
        Self {
            id: session.id().to_string(),
            message_count: session.history_len(),
            created_at: session.created_at().to_rfc3339(),
        }
    }
}

/// GET /api/sessions - List all sessions.
async fn api_list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    let sessions: Vec<SessionInfo> = state
        .sessions
        .list_ids()
        .iter()
        .filter_map(|id| state.sessions.get(id).map(|s| SessionInfo::from_session(&s)))
        .collect();

    Json(sessions)
}

/// POST /api/sessions - Create a new session.
async fn api_create_session(State(state): State<AppState>) -> Json<SessionInfo> {
    let session = state.sessions.create();
    Json(SessionInfo::from_session(&session))
}

/// GET /api/sessions/:id - Get session details.
async fn api_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, StatusCode> {
    match state.sessions.get(&id) {
        Some(session) => Ok(Json(SessionInfo::from_session(&session))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// DELETE /api/sessions/:id - Delete a session.
async fn api_delete_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.sessions.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// Message DTO for API responses.
#[derive(Debug, Serialize)]
struct MessageDto {
    role: String,
    content: String,
}

/// GET /api/sessions/:id/messages - Get committed history as JSON.
async fn api_get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageDto>>, StatusCode> {
    match state.sessions.get(&id) {
        Some(session) => {
            let messages: Vec<MessageDto> = session
                .history()
                .iter()
                .map(|m| MessageDto {
                    role: format!("{:?}", m.role).to_lowercase(),
                    content: m.content.clone(),
                })
                .collect();
            Ok(Json(messages))
        }
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// DELETE /api/sessions/:id/messages - Clear transcript and history together.
async fn api_clear_messages(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.sessions.get(&id) {
        Some(session) => {
            session.clear();
            tracing::info!(session_id = %id, "session cleared");
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

/// GET /api/sessions/:id/transcript - Rendered transcript fragment (HTMX target).
async fn api_get_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Html<String>, StatusCode> {
    match state.sessions.get(&id) {
        Some(session) => Ok(Html(session.with_transcript(Transcript::render_html))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// Request body for system messages.
#[derive(Debug, Deserialize)]
struct SystemMessageRequest {
    content: String,
}

/// POST /api/sessions/:id/system - Append a system message to the transcript.
async fn api_add_system_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SystemMessageRequest>,
) -> StatusCode {
    match state.sessions.get(&id) {
        Some(session) => {
            session.with_transcript(|t| t.add_system_message(&req.content));
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

/// Client-reported scroll metrics.
#[derive(Debug, Deserialize)]
struct ViewportReport {
    scroll_top: u32,
    scroll_height: u32,
    client_height: u32,
}

/// POST /api/sessions/:id/viewport - Record client scroll position.
async fn api_report_viewport(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(report): Json<ViewportReport>,
) -> StatusCode {
    match state.sessions.get(&id) {
        Some(session) => {
            session.with_transcript(|t| {
                t.record_scroll(report.scroll_top, report.scroll_height, report.client_height);
            });
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTML Page Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Generate the HTML shell for the application.
fn html_shell(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="description" content="Streaming chat">
    <title>{title} - Chat Stream</title>
    <style>
        body {{ font-family: system-ui, sans-serif; max-width: 48rem; margin: 0 auto; padding: 1rem; }}
        #messages {{ height: 60vh; overflow-y: auto; border: 1px solid #ddd; border-radius: 0.5rem; padding: 1rem; }}
        .sender-header {{ font-weight: 600; margin-top: 0.75rem; }}
        .timestamp {{ color: #888; font-size: 0.75rem; margin-left: 0.5rem; }}
        .message.system {{ color: #666; font-style: italic; }}
        .message.streaming {{ opacity: 0.8; white-space: pre-wrap; }}
        .error-message {{ color: #b00020; }}
        form {{ display: flex; gap: 0.5rem; margin-top: 1rem; }}
        textarea {{ flex: 1; resize: none; padding: 0.5rem; }}
    </style>
</head>
<body>
    <h1>Chat Stream</h1>
    {content}
</body>
</html>"#
    )
}

/// Chat page content: transcript container, composer, and the small client
/// driving the SSE stream and viewport reports.
fn chat_content() -> &'static str {
    r#"
    <div id="transcript"><div id="messages" role="log" aria-live="polite"></div></div>
    <form id="composer">
        <textarea name="message" rows="2" placeholder="Type your message..." required></textarea>
        <button type="submit">Send</button>
    </form>
    <script>
        let sessionId = null;

        const container = () => document.getElementById('messages');

        async function refreshTranscript() {
            if (!sessionId) return;
            const resp = await fetch(`/api/sessions/${sessionId}/transcript`);
            if (!resp.ok) return;
            document.getElementById('transcript').innerHTML = await resp.text();
            const el = container();
            if (el && el.dataset.autoscroll === 'true') {
                el.scrollTop = el.scrollHeight;
            }
            if (el) {
                el.addEventListener('scroll', reportViewport, { passive: true });
            }
        }

        function reportViewport() {
            const el = container();
            if (!el || !sessionId) return;
            fetch(`/api/sessions/${sessionId}/viewport`, {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({
                    scroll_top: Math.round(el.scrollTop),
                    scroll_height: el.scrollHeight,
                    client_height: el.clientHeight,
                }),
            });
        }

        document.getElementById('composer').addEventListener('submit', async (e) => {
            e.preventDefault();
            const field = e.target.querySelector('[name=message]');
            const message = field.value;
            field.value = '';

            const resp = await fetch('/api/chat', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({ message, session_id: sessionId }),
            });
            const data = await resp.json();
            sessionId = data.session_id;
            await refreshTranscript();
            if (!data.stream_url) return;

            const source = new EventSource(data.stream_url);
            const onEvent = () => refreshTranscript();
            for (const name of ['message.sent', 'token.new', 'tokens.done', 'error']) {
                source.addEventListener(name, onEvent);
            }
            source.addEventListener('tokens.done', () => source.close());
            source.onerror = () => source.close();
        });
    </script>
    "#
}

/// Index page handler.
async fn index_handler() -> impl IntoResponse {
    Html(html_shell("Chat", chat_content()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn single_error_sse(message: &str) -> Response {
    let err = StreamEvent::Error {
        message: message.to_string(),
    };
    let done = StreamEvent::TokensDone;

    let payload = format!("{}{}", sse_event(&err), sse_event(&done));
    let body = axum::body::Body::from(payload);
    build_sse_response(body)
}

fn build_sse_response(body: axum::body::Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert("Content-Type", "text/event-stream".parse().unwrap());
    h.insert("Cache-Control", "no-cache".parse().unwrap());
    h.insert("Connection", "keep-alive".parse().unwrap());
    h.insert("X-Accel-Buffering", "no".parse().unwrap());
    resp
}
