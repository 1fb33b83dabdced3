//! Stream event types for the token channel.
//!
//! This module defines the event vocabulary spoken between the token source
//! and the transcript renderer, and the SSE encoding used to forward those
//! same events to the browser.
//!
//! # Event Types
//!
//! - `MessageSent` once the outbound request has been dispatched
//! - `NewToken` for each streamed text fragment
//! - `TokensDone` exactly once per reply, after which no further tokens arrive
//! - `Error` for transport faults (the source still terminates with `TokensDone`)
//!
//! # Example
//!
//! ```rust
//! use chat_stream::events::{StreamEvent, sse_event};
//!
//! let event = StreamEvent::NewToken {
//!     token: "Hello".to_string(),
//! };
//! let sse = sse_event(&event);
//! assert!(sse.contains("token.new"));
//! ```

use serde::{Deserialize, Serialize};

/// Events emitted by a token source for one assistant reply.
///
/// The transcript renderer consumes these strictly in arrival order; the
/// channel between the two preserves ordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum StreamEvent {
    /// The outbound request has been dispatched (not necessarily answered).
    #[serde(rename = "message.sent")]
    MessageSent,

    /// One opaque, non-empty text fragment, in strict arrival order.
    #[serde(rename = "token.new")]
    NewToken {
        /// The text fragment to append.
        token: String,
    },

    /// Terminal event; no further tokens arrive until the next send.
    #[serde(rename = "tokens.done")]
    TokensDone,

    /// A transport or protocol fault occurred during streaming.
    #[serde(rename = "error")]
    Error {
        /// Error message.
        message: String,
    },
}

impl StreamEvent {
    /// Whether this event ends the stream for the current send.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TokensDone)
    }
}

/// Convert a [`StreamEvent`] to an SSE-formatted string.
///
/// The output follows the Server-Sent Events specification with both
/// an `event:` line (for `EventSource` listeners) and a `data:` line
/// containing the JSON payload.
pub fn sse_event(evt: &StreamEvent) -> String {
    let json = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
    });

    let event_name = event_name(evt);

    format!("event: {event_name}\ndata: {json}\n\n")
}

/// Get the SSE event name for a [`StreamEvent`].
pub fn event_name(evt: &StreamEvent) -> &'static str {
    match evt {
        StreamEvent::MessageSent => "message.sent",
        StreamEvent::NewToken { .. } => "token.new",
        StreamEvent::TokensDone => "tokens.done",
        StreamEvent::Error { .. } => "error",
    }
}
