//! The transcript renderer: token accumulation, grouping, and HTML output.
//!
//! This is the stateful core of the application. It consumes token-source
//! events in arrival order, accumulates streamed fragments into an
//! in-progress bot message, and on flush renders the buffered text into
//! sanitized markdown HTML. Consecutive messages from the same sender merge
//! into one header-bearing group; system messages always get their own
//! header.
//!
//! The accumulation buffer is explicit owned state; presentation is
//! generated from it, never read back out of rendered output.

pub mod markdown;
pub mod scroll;
pub mod worker;

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use scroll::Viewport;

/// Delay between a lone-newline token and the deferred flush it schedules.
pub const NEWLINE_FLUSH_DELAY: Duration = Duration::from_millis(100);

/// How long a transient inline error notice stays visible.
pub const NOTICE_TTL: Duration = Duration::from_secs(5);

/// Sender label used for lazily-opened streaming messages.
pub const BOT_SENDER: &str = "Bot";

/// Sender label for system notices.
pub const SYSTEM_SENDER: &str = "System";

/// Classification of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Authored by the person chatting.
    User,
    /// Streamed from the token source.
    Bot,
    /// Out-of-band application notice.
    System,
}

impl MessageKind {
    fn css_class(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
            Self::System => "system",
        }
    }
}

/// Message body: finalized markup, or the raw token buffer while streaming.
#[derive(Debug, Clone)]
enum MessageContent {
    /// Ordered raw token fragments not yet rendered.
    Streaming(Vec<String>),
    /// Sanitized markup, immutable once set.
    Rendered(String),
}

/// One rendered unit in the transcript.
#[derive(Debug, Clone)]
pub struct Message {
    sender: String,
    kind: MessageKind,
    timestamp: DateTime<Utc>,
    content: MessageContent,
}

impl Message {
    /// Whether this message is still accumulating tokens.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self.content, MessageContent::Streaming(_))
    }

    /// Sender label.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Message classification.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }
}

#[derive(Debug, Clone)]
struct GroupHeader {
    sender: String,
    timestamp: DateTime<Utc>,
}

/// A visual cluster of consecutive same-sender messages.
#[derive(Debug)]
pub struct MessageGroup {
    header: Option<GroupHeader>,
    messages: Vec<Message>,
}

impl MessageGroup {
    /// Whether this group renders its own sender header.
    #[must_use]
    pub fn has_header(&self) -> bool {
        self.header.is_some()
    }

    /// Messages in this group, in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

#[derive(Debug)]
struct Notice {
    text: String,
    expires_at: Instant,
}

/// Append-only ordered conversation log.
///
/// Invariants: at most one message is streaming at any time, and message
/// order is strictly arrival order.
#[derive(Debug, Default)]
pub struct Transcript {
    groups: Vec<MessageGroup>,
    last_sender: Option<String>,
    message_count: usize,
    /// Position of the streaming message, held explicitly so interleaved
    /// user or system appends never orphan the accumulation.
    accumulating_at: Option<(usize, usize)>,
    viewport: Viewport,
    notices: Vec<Notice>,
}

impl Transcript {
    /// Create an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user-authored message.
    ///
    /// Whitespace-only text is logged and skipped; the transcript is
    /// unchanged and no error surfaces.
    pub fn append_user_message(&mut self, text: &str, sender: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            tracing::warn!(sender = %sender, "empty user message ignored");
            return;
        }

        tracing::debug!(sender = %sender, length = trimmed.len(), "appending user message");

        let message = Message {
            sender: sender.to_string(),
            kind: MessageKind::User,
            timestamp: Utc::now(),
            content: MessageContent::Rendered(markdown::escape_with_breaks(trimmed)),
        };
        self.push_message(message);
        self.viewport.request_scroll();
    }

    /// Consume one streamed token.
    ///
    /// Lazily opens the streaming bot message on the first token. Returns
    /// the deferred-flush delay when the token is exactly one newline; the
    /// caller owns the timer (the flush itself is idempotent).
    pub fn handle_new_token(&mut self, token: &str) -> Option<Duration> {
        if self.accumulating_at.is_none() {
            let message = Message {
                sender: BOT_SENDER.to_string(),
                kind: MessageKind::Bot,
                timestamp: Utc::now(),
                content: MessageContent::Streaming(Vec::new()),
            };
            self.push_message(message);
            // push_message always lands the message at the tail.
            let group = self.groups.len() - 1;
            let index = self.groups[group].messages.len() - 1;
            self.accumulating_at = Some((group, index));
        }

        if let Some(buffer) = self.accumulating_buffer_mut() {
            buffer.push(token.to_string());
        }

        if self.viewport.is_at_bottom() {
            self.viewport.request_scroll();
        }

        (token == "\n").then_some(NEWLINE_FLUSH_DELAY)
    }

    /// Authoritative completion signal: flush whatever is accumulating.
    ///
    /// A call with no open accumulation is a no-op. Returns the raw
    /// concatenated reply text when a message was finalized.
    pub fn handle_tokens_done(&mut self) -> Option<String> {
        self.flush_accumulating_message()
    }

    /// Finalize the accumulating message into rendered markup.
    ///
    /// No-op when nothing is accumulating. The buffered tokens are joined
    /// in arrival order, rendered through the markdown path, and the
    /// streaming flag cleared so a subsequent token starts a new message.
    pub fn flush_accumulating_message(&mut self) -> Option<String> {
        self.accumulating_at?;

        let raw = self
            .accumulating_buffer_mut()
            .map(|buffer| buffer.concat())
            .unwrap_or_default();

        // Render failure degrades to escaped text and surfaces a notice; the
        // transcript itself is never corrupted.
        let rendered = match markdown::try_render(&raw) {
            Some(html) => html,
            None => {
                self.show_error("Error rendering message");
                markdown::escape_with_breaks(&raw)
            }
        };

        if let Some(message) = self.streaming_message_mut() {
            message.content = MessageContent::Rendered(rendered);
        }
        self.accumulating_at = None;

        tracing::debug!(length = raw.len(), "flushed accumulating message");

        // Final scroll adjustment once the rendered markup lands, unless the
        // reader has scrolled away.
        if self.viewport.is_at_bottom() {
            self.viewport.request_scroll();
        }

        Some(raw)
    }

    /// Append a system notice; always opens its own header.
    pub fn add_system_message(&mut self, content: &str) {
        let message = Message {
            sender: SYSTEM_SENDER.to_string(),
            kind: MessageKind::System,
            timestamp: Utc::now(),
            content: MessageContent::Rendered(markdown::render_markdown(content)),
        };
        self.push_message(message);
        self.viewport.request_scroll();
    }

    /// Surface a transient inline error notice (auto-dismissed).
    pub fn show_error(&mut self, message: &str) {
        tracing::warn!(message = %message, "showing transcript error notice");
        self.notices.push(Notice {
            text: message.to_string(),
            expires_at: Instant::now() + NOTICE_TTL,
        });
    }

    /// Reset the transcript to empty. Irrecoverable.
    pub fn clear_messages(&mut self) {
        self.groups.clear();
        self.notices.clear();
        self.last_sender = None;
        self.message_count = 0;
        self.accumulating_at = None;
        self.viewport.reset();
    }

    /// Total messages appended since the last clear.
    ///
    /// A streaming message counts from the moment it opens.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.message_count
    }

    /// Message groups in order, for inspection.
    #[must_use]
    pub fn groups(&self) -> &[MessageGroup] {
        &self.groups
    }

    /// Record client-reported scroll metrics.
    pub fn record_scroll(&mut self, scroll_top: u32, scroll_height: u32, client_height: u32) {
        self.viewport
            .record_scroll(scroll_top, scroll_height, client_height);
    }

    /// Render the whole transcript as an HTML fragment.
    ///
    /// The fragment carries `data-autoscroll="true"` when a coalesced
    /// scroll-to-bottom request is due.
    pub fn render_html(&mut self) -> String {
        self.prune_notices();
        let autoscroll = self.viewport.take_scroll_request();

        let mut out = String::new();
        out.push_str(r#"<div id="messages" role="log" aria-live="polite" aria-label="Chat messages""#);
        if autoscroll {
            out.push_str(r#" data-autoscroll="true""#);
        }
        out.push('>');

        for group in &self.groups {
            out.push_str(r#"<div class="message-group">"#);
            if let Some(header) = &group.header {
                let _ = write!(
                    out,
                    r#"<div class="sender-header"><span>{}</span><span class="timestamp">{}</span></div>"#,
                    markdown::escape_html(&header.sender),
                    header.timestamp.format("%H:%M"),
                );
            }
            for message in &group.messages {
                render_message(&mut out, message);
            }
            out.push_str("</div>");
        }

        for notice in &self.notices {
            let _ = write!(
                out,
                r#"<div class="error-message" role="alert">{}</div>"#,
                markdown::escape_html(&notice.text),
            );
        }

        out.push_str("</div>");
        out
    }

    fn push_message(&mut self, message: Message) {
        let sender = message.sender.clone();
        let needs_header = message.kind == MessageKind::System
            || self.last_sender.as_deref() != Some(sender.as_str());

        if needs_header || self.groups.is_empty() {
            self.groups.push(MessageGroup {
                header: Some(GroupHeader {
                    sender: sender.clone(),
                    timestamp: message.timestamp,
                }),
                messages: vec![message],
            });
        } else if let Some(last) = self.groups.last_mut() {
            last.messages.push(message);
        }

        self.last_sender = Some(sender);
        self.message_count += 1;
    }

    fn streaming_message_mut(&mut self) -> Option<&mut Message> {
        let (group, index) = self.accumulating_at?;
        self.groups
            .get_mut(group)
            .and_then(|g| g.messages.get_mut(index))
    }

    fn accumulating_buffer_mut(&mut self) -> Option<&mut Vec<String>> {
        match self.streaming_message_mut().map(|m| &mut m.content) {
            Some(MessageContent::Streaming(buffer)) => Some(buffer),
            _ => None,
        }
    }

    fn prune_notices(&mut self) {
        let now = Instant::now();
        self.notices.retain(|notice| notice.expires_at > now);
    }
}

fn render_message(out: &mut String, message: &Message) {
    let class = message.kind.css_class();
    match &message.content {
        MessageContent::Streaming(tokens) => {
            let _ = write!(
                out,
                r#"<div class="message {class} streaming" role="article" aria-label="Message from {}" aria-live="polite">{}</div>"#,
                markdown::escape_html(&message.sender),
                markdown::escape_html(&tokens.concat()),
            );
        }
        MessageContent::Rendered(html) => {
            let _ = write!(
                out,
                r#"<div class="message {class}" role="article" aria-label="Message from {}">{html}</div>"#,
                markdown::escape_html(&message.sender),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_increments_count() {
        let mut t = Transcript::new();
        t.append_user_message("hello", "You");
        assert_eq!(t.message_count(), 1);
        t.append_user_message("again", "You");
        assert_eq!(t.message_count(), 2);
    }

    #[test]
    fn test_empty_user_message_is_skipped() {
        let mut t = Transcript::new();
        t.append_user_message("", "You");
        t.append_user_message("   \n\t ", "You");
        assert_eq!(t.message_count(), 0);
        assert!(t.groups().is_empty());
    }

    #[test]
    fn test_same_sender_merges_into_one_group() {
        let mut t = Transcript::new();
        t.append_user_message("first", "You");
        t.append_user_message("second", "You");
        assert_eq!(t.groups().len(), 1);
        assert!(t.groups()[0].has_header());
        assert_eq!(t.groups()[0].messages().len(), 2);
    }

    #[test]
    fn test_sender_change_opens_new_group() {
        let mut t = Transcript::new();
        t.append_user_message("hi", "You");
        t.handle_new_token("reply");
        t.handle_tokens_done();
        t.append_user_message("more", "You");
        assert_eq!(t.groups().len(), 3);
        assert!(t.groups().iter().all(MessageGroup::has_header));
    }

    #[test]
    fn test_system_message_always_gets_own_group() {
        let mut t = Transcript::new();
        t.add_system_message("first notice");
        t.add_system_message("second notice");
        assert_eq!(t.groups().len(), 2);
        assert!(t.groups().iter().all(MessageGroup::has_header));
    }

    #[test]
    fn test_token_accumulation_and_flush() {
        let mut t = Transcript::new();
        t.handle_new_token("Hello");
        t.handle_new_token(" world");
        assert_eq!(t.message_count(), 1);

        let raw = t.handle_tokens_done();
        assert_eq!(raw.as_deref(), Some("Hello world"));

        let html = t.render_html();
        assert!(html.contains("Hello world"));
        assert!(!html.contains("streaming"));
    }

    #[test]
    fn test_tokens_done_without_accumulation_is_noop() {
        let mut t = Transcript::new();
        assert!(t.handle_tokens_done().is_none());
        assert_eq!(t.message_count(), 0);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let mut t = Transcript::new();
        t.handle_new_token("text");
        assert!(t.flush_accumulating_message().is_some());
        assert!(t.flush_accumulating_message().is_none());
        assert_eq!(t.message_count(), 1);
    }

    #[test]
    fn test_newline_token_schedules_flush() {
        let mut t = Transcript::new();
        assert!(t.handle_new_token("Line1").is_none());
        assert_eq!(t.handle_new_token("\n"), Some(NEWLINE_FLUSH_DELAY));
    }

    #[test]
    fn test_token_after_flush_starts_new_message() {
        let mut t = Transcript::new();
        t.handle_new_token("Line1");
        t.flush_accumulating_message();
        t.handle_new_token("Line2");
        assert_eq!(t.message_count(), 2);
        let raw = t.handle_tokens_done();
        assert_eq!(raw.as_deref(), Some("Line2"));
    }

    #[test]
    fn test_consecutive_bot_messages_share_group() {
        let mut t = Transcript::new();
        t.handle_new_token("Line1");
        t.flush_accumulating_message();
        t.handle_new_token("Line2");
        t.handle_tokens_done();
        // Same sender, so the second flushed line merges into the group.
        assert_eq!(t.groups().len(), 1);
        assert_eq!(t.groups()[0].messages().len(), 2);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut t = Transcript::new();
        t.append_user_message("hi", "You");
        t.handle_new_token("partial");
        t.clear_messages();
        assert_eq!(t.message_count(), 0);
        assert!(t.groups().is_empty());

        // Fresh accumulation, no residue from before the clear.
        t.handle_new_token("fresh");
        let raw = t.handle_tokens_done();
        assert_eq!(raw.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_streaming_message_renders_escaped_tokens() {
        let mut t = Transcript::new();
        t.handle_new_token("<script>alert(1)</script>");
        let html = t.render_html();
        assert!(html.contains("streaming"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_flushed_markdown_is_sanitized() {
        let mut t = Transcript::new();
        t.handle_new_token("hello <script>alert('xss')</script>");
        t.handle_tokens_done();
        let html = t.render_html();
        assert!(!html.to_lowercase().contains("<script"));
    }

    #[test]
    fn test_user_message_markup_is_escaped() {
        let mut t = Transcript::new();
        t.append_user_message("<img onerror=alert(1) src=x>", "You");
        let html = t.render_html();
        assert!(!html.contains("<img"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_notice_auto_dismisses() {
        let mut t = Transcript::new();
        t.show_error("Error rendering message");
        assert!(t.render_html().contains("Error rendering message"));

        tokio::time::advance(NOTICE_TTL + Duration::from_millis(1)).await;
        assert!(!t.render_html().contains("Error rendering message"));
    }

    #[test]
    fn test_header_shown_only_on_sender_change() {
        let mut t = Transcript::new();
        t.append_user_message("one", "You");
        t.append_user_message("two", "You");
        let html = t.render_html();
        assert_eq!(html.matches("sender-header").count(), 1);
    }

    #[test]
    fn test_interleaved_user_message_keeps_accumulation() {
        let mut t = Transcript::new();
        t.handle_new_token("Part1");
        t.append_user_message("interruption", "You");
        t.handle_new_token(" Part2");

        let raw = t.handle_tokens_done();
        assert_eq!(raw.as_deref(), Some("Part1 Part2"));

        // The bot message is finalized, not left streaming.
        assert!(
            !t.groups()
                .iter()
                .flat_map(|g| g.messages().iter())
                .any(Message::is_streaming)
        );
        assert_eq!(t.message_count(), 2);
        assert!(t.render_html().contains("Part1 Part2"));
    }

    #[test]
    fn test_interleaved_system_message_keeps_accumulation() {
        let mut t = Transcript::new();
        t.handle_new_token("alpha");
        t.add_system_message("notice");
        t.handle_new_token(" beta");

        let raw = t.handle_tokens_done();
        assert_eq!(raw.as_deref(), Some("alpha beta"));
    }

    #[test]
    fn test_flush_preserves_scroll_when_scrolled_up() {
        let mut t = Transcript::new();
        t.handle_new_token("tok");
        t.record_scroll(0, 1000, 400);
        let _ = t.render_html();

        t.flush_accumulating_message();
        let html = t.render_html();
        assert!(!html.contains("data-autoscroll"));
    }

    #[test]
    fn test_scroll_preserved_when_not_at_bottom() {
        let mut t = Transcript::new();
        t.append_user_message("seed", "You");
        let _ = t.render_html();

        // User scrolls up; token arrival must not request a scroll.
        t.record_scroll(0, 1000, 400);
        t.handle_new_token("tok");
        let html = t.render_html();
        assert!(!html.contains("data-autoscroll"));
    }
}
