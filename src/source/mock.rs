//! Canned token source with realistic pacing.
//!
//! Used when no API key is configured, and by tests (with zero delays so
//! suites do not wait on wall-clock pacing). The script includes bare `"\n"`
//! tokens, which exercise the transcript's deferred-flush path end to end.

use std::time::Duration;

use rand::Rng;

use crate::events::StreamEvent;

use super::{ChatMessage, EventStream, TokenSource};

/// Scripted reply, one entry per token. Mid-word splits and lone newlines
/// mirror how a real model tokenizes.
const MOCK_TOKENS: &[&str] = &[
    "Good", " morning", " Mr", " Plop", "py", ",", "and", " I", " said", "\n", "\"", "Good",
    " morn", "ing", " Mrs", " Plop", "py", "\"", "\n", "Oh", " how", " the", " win", "ter",
    " even", "ings", " must", " just", " fly",
];

/// Simulated round-trip before the send is acknowledged.
const ACK_DELAY: Duration = Duration::from_secs(1);

/// Inter-token jitter range in milliseconds.
const TOKEN_DELAY_MS: std::ops::Range<u64> = 50..100;

/// Token source that replays a fixed script.
#[derive(Debug, Clone)]
pub struct MockTokenSource {
    ack_delay: Duration,
    paced: bool,
}

impl Default for MockTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTokenSource {
    /// Paced mock: one-second ack, 50-100ms between tokens.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ack_delay: ACK_DELAY,
            paced: true,
        }
    }

    /// Mock with no delays at all, for tests.
    #[must_use]
    pub fn instant() -> Self {
        Self {
            ack_delay: Duration::ZERO,
            paced: false,
        }
    }
}

#[async_trait::async_trait]
impl TokenSource for MockTokenSource {
    async fn stream(&self, history: Vec<ChatMessage>) -> EventStream {
        tracing::debug!(history_len = history.len(), "mock stream opened");
        let ack_delay = self.ack_delay;
        let paced = self.paced;

        let out = async_stream::stream! {
            if !ack_delay.is_zero() {
                tokio::time::sleep(ack_delay).await;
            }
            yield StreamEvent::MessageSent;

            for token in MOCK_TOKENS {
                if paced {
                    let jitter = rand::thread_rng().gen_range(TOKEN_DELAY_MS);
                    tokio::time::sleep(Duration::from_millis(jitter)).await;
                }
                yield StreamEvent::NewToken {
                    token: (*token).to_string(),
                };
            }

            yield StreamEvent::TokensDone;
        };

        Box::pin(out)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_mock_stream_shape() {
        let source = MockTokenSource::instant();
        let events: Vec<_> = source.stream(Vec::new()).await.collect().await;

        assert_eq!(events.first(), Some(&StreamEvent::MessageSent));
        assert_eq!(events.last(), Some(&StreamEvent::TokensDone));

        let tokens: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::NewToken { token } => Some(token.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens.len(), MOCK_TOKENS.len());
        assert_eq!(tokens[0], "Good");
        assert!(tokens.contains(&"\n"));
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_event() {
        let source = MockTokenSource::instant();
        let events: Vec<_> = source.stream(Vec::new()).await.collect().await;
        let dones = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(dones, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_mock_acknowledges_after_delay() {
        let source = MockTokenSource::new();
        let mut stream = source.stream(Vec::new()).await;

        let started = tokio::time::Instant::now();
        let first = stream.next().await;
        assert_eq!(first, Some(StreamEvent::MessageSent));
        assert!(started.elapsed() >= ACK_DELAY);
    }
}
