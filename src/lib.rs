//! Token-streaming chat server.
//!
//! A browser-chat pipeline: a token source emits send-acknowledged, token,
//! and completion events; a per-session transcript accumulates those tokens,
//! groups messages by sender, and renders sanitized markdown HTML with an
//! auto-scroll policy the client honors.
//!
//! # Architecture
//!
//! - **Server**: Axum-based HTTP server with SSE streaming
//! - **Token Source**: OpenAI-compatible chat-completions driver, with a
//!   paced mock fallback when no credentials are configured
//! - **Transcript**: per-session accumulation, grouping, markdown rendering
//!
//! # Modules
//!
//! - [`events`]: the event vocabulary between source and transcript
//! - [`source`]: token source trait and implementations
//! - [`transcript`]: transcript state machine, rendering, scroll policy
//! - [`session`]: conversation and session management

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod events;
pub mod server;
pub mod session;
pub mod source;
pub mod transcript;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::session::SessionStore;
use crate::source::TokenSource;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session store for conversation management.
    pub sessions: SessionStore,
    /// Token source feeding assistant replies.
    pub source: Arc<dyn TokenSource>,
    /// Global configuration.
    pub config: Arc<AppConfig>,
}
