//! Server-Sent Events Transport
//!
//! The response body stream owns the [`StreamSession`]; when the client
//! disconnects axum drops the body, which closes the session.

use axum::response::sse::{Event as SseEvent, Sse};
use futures_util::stream::{self, Stream};
use std::convert::Infallible;

use super::session::StreamSession;

/// Wrap a session as an SSE response
///
/// Each frame is sent with its `type` as the SSE event name and the JSON
/// object as data.
pub fn sse_response(session: StreamSession) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let frames = stream::unfold(session, |mut session| async move {
        loop {
            let message = session.next_message().await?;
            match SseEvent::default().event(message.kind()).json_data(&message) {
                Ok(event) => return Some((Ok::<_, Infallible>(event), session)),
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.id(),
                        error = %e,
                        kind = message.kind(),
                        "Failed to serialize stream frame"
                    );
                }
            }
        }
    });

    Sse::new(frames)
}
