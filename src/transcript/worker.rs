//! Per-reply worker task driving a session's transcript from a token stream.
//!
//! The worker is the single consumer of one reply's event stream. It applies
//! each event to the session transcript in arrival order, owns the deferred
//! newline-flush timer, commits the finalized reply to the conversation
//! history, and forwards every event to an outbound channel for the SSE
//! response. Timer expiry never reorders events: the select loop applies
//! whichever fires first, and the flush itself is idempotent.

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::events::StreamEvent;
use crate::session::Session;

/// Outbound channel depth; small since the SSE writer drains continuously.
const FORWARD_BUFFER: usize = 64;

/// Spawn a worker consuming `events` into `session`'s transcript.
///
/// Returns the forwarded event stream for the SSE response. The worker ends
/// after the terminal event or when the source channel closes.
pub fn spawn(session: Session, events: mpsc::Receiver<StreamEvent>) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(FORWARD_BUFFER);
    tokio::spawn(run(session, events, tx));
    rx
}

async fn run(
    session: Session,
    mut events: mpsc::Receiver<StreamEvent>,
    tx: mpsc::Sender<StreamEvent>,
) {
    let mut flush_at: Option<Instant> = None;
    // Full reply text across display flushes; this is what history gets.
    let mut reply = String::new();

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else {
                    // Source dropped without a terminal event. Flush whatever
                    // accumulated so the transcript is not left streaming.
                    tracing::warn!(session_id = %session.id(), "token stream closed without terminal event");
                    session.with_transcript(|t| {
                        t.flush_accumulating_message();
                    });
                    break;
                };

                let terminal = event.is_terminal();
                apply(&session, &mut flush_at, &mut reply, &event);

                // Forwarding is best-effort: a gone SSE subscriber must not
                // stop transcript and history updates.
                let _ = tx.send(event).await;

                if terminal {
                    break;
                }
            }
            () = sleep_until_opt(flush_at) => {
                flush_at = None;
                session.with_transcript(|t| {
                    t.flush_accumulating_message();
                });
            }
        }
    }
}

fn apply(
    session: &Session,
    flush_at: &mut Option<Instant>,
    reply: &mut String,
    event: &StreamEvent,
) {
    match event {
        StreamEvent::MessageSent => {
            tracing::debug!(session_id = %session.id(), "send acknowledged");
        }
        StreamEvent::NewToken { token } => {
            reply.push_str(token);
            let delay = session.with_transcript(|t| t.handle_new_token(token));
            if let Some(delay) = delay {
                // Earliest deadline wins: a newline arriving while one is
                // already scheduled does not push the flush out.
                flush_at.get_or_insert(Instant::now() + delay);
            }
        }
        StreamEvent::TokensDone => {
            *flush_at = None;
            session.with_transcript(|t| {
                t.handle_tokens_done();
            });
            if !reply.is_empty() {
                session.push_assistant_message(reply.as_str());
                tracing::debug!(session_id = %session.id(), length = reply.len(), "reply committed to history");
            }
        }
        StreamEvent::Error { message } => {
            session.with_transcript(|t| t.show_error(message));
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
