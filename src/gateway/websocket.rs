//! WebSocket Transport
//!
//! Drives an upgraded socket for one [`StreamSession`]. This task is the
//! only writer to the socket; a companion task watches the read half for
//! the client going away.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use super::messages::ServerMessage;
use super::session::StreamSession;

/// Pump session frames to the client until either side ends the stream
pub async fn serve_websocket(socket: WebSocket, mut session: StreamSession) {
    let session_id = session.id();
    let server_id = session.scope().server_id;
    let (mut sender, mut receiver) = socket.split();

    // Disconnect detection: inbound frames are not part of the protocol,
    // so anything other than Close or an error is ignored.
    let cancel = session.cancellation();
    let watcher = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = receiver.next() => match frame {
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(
                            session_id = %session_id,
                            server_id = %server_id,
                            "Client closed WebSocket"
                        );
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session_id, error = %e, "WebSocket receive error");
                        break;
                    }
                },
            }
        }
        cancel.cancel();
    });

    let cancel = session.cancellation();
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = session.next_message() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let Some(text) = encode(&message) else {
            continue;
        };
        if sender.send(Message::Text(text)).await.is_err() {
            tracing::debug!(
                session_id = %session_id,
                server_id = %server_id,
                "WebSocket send failed, closing stream"
            );
            break;
        }

        // Keepalives also go out as a transport ping so proxies see traffic
        if matches!(message, ServerMessage::Ping { .. })
            && sender.send(Message::Ping(Vec::new())).await.is_err()
        {
            break;
        }
    }

    session.close();
    let _ = sender.close().await;
    watcher.abort();
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(error = %e, kind = message.kind(), "Failed to serialize stream frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame() {
        let text = encode(&ServerMessage::ping(2)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "ping");
        assert_eq!(value["dropped"], 2);
    }
}
