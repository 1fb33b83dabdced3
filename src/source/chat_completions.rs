//! Remote token source speaking the OpenAI chat-completions protocol.
//!
//! Connects to `{base_url}/chat/completions` with `stream: true` and parses
//! the SSE response into [`StreamEvent`]s. Frames are reassembled from raw
//! bytes on double-newline boundaries, so chunk fragmentation from the
//! network layer never splits a token.

use futures::StreamExt;

use crate::events::StreamEvent;

use super::{ChatMessage, EventStream, SourceSettings, TokenSource};

/// Driver for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct ChatCompletionsSource {
    http: reqwest::Client,
    settings: SourceSettings,
}

impl std::fmt::Debug for ChatCompletionsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsSource")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatCompletionsSource {
    /// Create a new source with the given settings.
    #[must_use]
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }
}

#[async_trait::async_trait]
impl TokenSource for ChatCompletionsSource {
    async fn stream(&self, history: Vec<ChatMessage>) -> EventStream {
        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );

        let body = serde_json::json!({
            "model": self.settings.model,
            "stream": true,
            "messages": history,
        });

        let mut rb = self.http.post(&url).json(&body);
        if let Some(key) = &self.settings.api_key {
            rb = rb.bearer_auth(key);
        }

        let out = async_stream::stream! {
            let resp = match rb.send().await.and_then(reqwest::Response::error_for_status) {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::error!(error = %e, "chat completions request failed");
                    yield StreamEvent::Error { message: format!("request failed: {e}") };
                    yield StreamEvent::TokensDone;
                    return;
                }
            };

            // The request is on the wire and answered; acknowledge the send.
            yield StreamEvent::MessageSent;

            let byte_stream = resp.bytes_stream();
            futures::pin_mut!(byte_stream);

            let mut buf = Vec::<u8>::new();

            'read: while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::error!(error = %e, "chat completions stream failed");
                        yield StreamEvent::Error { message: format!("stream failed: {e}") };
                        break 'read;
                    }
                };
                buf.extend_from_slice(&chunk);

                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    for line in text.lines() {
                        let Some(data) = line.trim().strip_prefix("data:") else {
                            continue;
                        };
                        let data = data.trim();

                        if data == "[DONE]" {
                            break 'read;
                        }

                        if let Some(token) = extract_token(data) {
                            yield StreamEvent::NewToken { token };
                        }
                    }
                }
            }

            // Terminal event in every outcome: clean [DONE], upstream close,
            // or mid-stream fault.
            yield StreamEvent::TokensDone;
        };

        Box::pin(out)
    }

    fn name(&self) -> &str {
        "chat-completions"
    }
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Pull the text delta out of one data frame.
///
/// Malformed frames are logged and skipped rather than failing the stream;
/// empty deltas (role-only frames, finish markers) yield nothing.
fn extract_token(data: &str) -> Option<String> {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed stream frame");
            return None;
        }
    };

    let token = value["choices"][0]["delta"]["content"].as_str()?;
    (!token.is_empty()).then(|| token.to_string())
}
