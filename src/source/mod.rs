//! Token sources: where streamed reply fragments come from.
//!
//! A [`TokenSource`] turns a conversation history into an ordered stream of
//! [`StreamEvent`]s. Two implementations exist:
//!
//! - [`ChatCompletionsSource`]: a remote OpenAI-compatible chat-completions
//!   endpoint, consumed over SSE
//! - [`MockTokenSource`]: a canned token script with realistic pacing, used
//!   when no API key is configured and in tests
//!
//! Every source upholds the same contract: events arrive in order, and the
//! stream always terminates with exactly one [`StreamEvent::TokensDone`],
//! even after a transport fault.

mod chat_completions;
mod mock;

pub use chat_completions::ChatCompletionsSource;
pub use mock::MockTokenSource;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::events::StreamEvent;

/// Boxed ordered event stream for one assistant reply.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Role of a conversation history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// One committed conversation history entry.
///
/// Only finalized messages belong here; an in-flight streamed reply is
/// transcript state until its terminal event lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    /// Build a user entry.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Build an assistant entry.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Connection settings for the remote chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Endpoint base URL, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Bearer token; `None` selects the mock source.
    pub api_key: Option<String>,
    /// Model identifier sent with each request.
    pub model: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// A producer of token streams for assistant replies.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Open a token stream for the given conversation history.
    ///
    /// The returned stream yields `MessageSent` once the request has been
    /// dispatched, then tokens, then a terminal `TokensDone`.
    async fn stream(&self, history: Vec<ChatMessage>) -> EventStream;

    /// Human-readable source name for logging.
    fn name(&self) -> &str;
}

/// Select a token source from settings.
///
/// A configured API key selects the remote source; its absence falls back
/// to the mock, which needs no network at all.
#[must_use]
pub fn build_source(settings: &SourceSettings, force_mock: bool) -> Arc<dyn TokenSource> {
    if force_mock || settings.api_key.is_none() {
        tracing::info!("token source: mock (no API key configured)");
        Arc::new(MockTokenSource::new())
    } else {
        tracing::info!(base_url = %settings.base_url, model = %settings.model, "token source: chat completions");
        Arc::new(ChatCompletionsSource::new(settings.clone()))
    }
}
