//! Session and conversation state management.
//!
//! This module provides in-memory session storage. Sessions are identified
//! by UUID and each one owns two pieces of state: the committed conversation
//! history sent to the token source, and the
//! [`Transcript`](crate::transcript::Transcript) that renders the chat,
//! including any in-flight streamed reply.
//!
//! # Architecture
//!
//! - [`Session`]: one conversation, cheap to clone (shared interior)
//! - [`SessionStore`]: thread-safe store for all active sessions
//!
//! # Example
//!
//! ```rust
//! use chat_stream::session::SessionStore;
//!
//! let store = SessionStore::new();
//! let session = store.create();
//! session.push_user_message("Hello!");
//!
//! assert_eq!(session.history().len(), 1);
//! ```

mod store;

pub use store::{DEFAULT_SESSION_TIMEOUT, Session, SessionStore};
