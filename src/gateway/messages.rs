//! Stream Message Types
//!
//! Frames sent from the server to stream clients. Both transports carry the
//! same JSON objects, discriminated by `type`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::scope::{StreamKind, StreamScope};
use crate::console::{ConnectionState, ConnectionStatus};
use crate::events::{Event, EventPayload, LogLevel};

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Stream established
    Connected {
        session_id: Uuid,
        stream: StreamKind,
        server_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        plugin_instance_id: Option<Uuid>,
    },
    /// A plugin log record
    Log {
        id: Uuid,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        message: String,
        error: Option<String>,
        fields: serde_json::Map<String, serde_json::Value>,
        plugin_instance_id: Uuid,
        plugin_name: String,
        plugin_id: String,
        server_id: Option<Uuid>,
    },
    /// A line of console output
    Console {
        id: Uuid,
        timestamp: DateTime<Utc>,
        server_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        message: String,
    },
    /// Console connection state changed
    ConsoleState {
        id: Uuid,
        timestamp: DateTime<Utc>,
        server_id: Option<Uuid>,
        state: ConnectionState,
        generation: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Keepalive
    Ping {
        timestamp: DateTime<Utc>,
        /// Events dropped for this stream so far because it fell behind
        dropped: u64,
    },
}

impl ServerMessage {
    /// Acknowledgement sent when a stream opens
    pub fn connected(session_id: Uuid, scope: &StreamScope) -> Self {
        ServerMessage::Connected {
            session_id,
            stream: scope.kind,
            server_id: scope.server_id,
            plugin_instance_id: scope.plugin_instance_id,
        }
    }

    /// Snapshot of a console connection as a state frame
    pub fn console_status(status: &ConnectionStatus) -> Self {
        ServerMessage::ConsoleState {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            server_id: Some(status.server_id),
            state: status.state,
            generation: status.generation,
            error: status.last_error.clone(),
        }
    }

    pub fn ping(dropped: u64) -> Self {
        ServerMessage::Ping {
            timestamp: Utc::now(),
            dropped,
        }
    }

    /// Render an event as a client frame
    pub fn from_event(event: &Event) -> Self {
        match &event.payload {
            EventPayload::PluginLog(record) | EventPayload::PluginError(record) => {
                ServerMessage::Log {
                    id: event.id,
                    timestamp: event.timestamp,
                    level: record.level,
                    message: record.message.clone(),
                    error: record.error.clone(),
                    fields: record.fields.clone(),
                    plugin_instance_id: record.plugin_instance_id,
                    plugin_name: record.plugin_name.clone(),
                    plugin_id: record.plugin_id.clone(),
                    server_id: event.server_id,
                }
            }
            EventPayload::ConsoleOutput { channel, message } => ServerMessage::Console {
                id: event.id,
                timestamp: event.timestamp,
                server_id: event.server_id,
                channel: channel.clone(),
                message: message.clone(),
            },
            EventPayload::ConsoleState {
                state,
                generation,
                error,
            } => ServerMessage::ConsoleState {
                id: event.id,
                timestamp: event.timestamp,
                server_id: event.server_id,
                state: *state,
                generation: *generation,
                error: error.clone(),
            },
        }
    }

    /// The `type` discriminator, also used as the SSE event name
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::Log { .. } => "log",
            ServerMessage::Console { .. } => "console",
            ServerMessage::ConsoleState { .. } => "console_state",
            ServerMessage::Ping { .. } => "ping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PluginLogRecord;

    #[test]
    fn test_serialize_connected() {
        let session_id = Uuid::new_v4();
        let server_id = Uuid::new_v4();
        let scope = StreamScope::new(StreamKind::PluginLogs, server_id, None);
        let json = serde_json::to_value(ServerMessage::connected(session_id, &scope)).unwrap();

        assert_eq!(json["type"], "connected");
        assert_eq!(json["stream"], "plugin_logs");
        assert_eq!(json["server_id"], server_id.to_string());
        assert!(json.get("plugin_instance_id").is_none());
    }

    #[test]
    fn test_serialize_log() {
        let server_id = Uuid::new_v4();
        let instance = Uuid::new_v4();
        let record = PluginLogRecord::new(instance, "auto-ban", "Auto Ban", LogLevel::Error, "failed")
            .error("timeout")
            .field("player", "76561198000000000");
        let event = Event::plugin_log(Some(server_id), record);

        let message = ServerMessage::from_event(&event);
        assert_eq!(message.kind(), "log");

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "log");
        assert_eq!(json["id"], event.id.to_string());
        assert_eq!(json["level"], "error");
        assert_eq!(json["message"], "failed");
        assert_eq!(json["error"], "timeout");
        assert_eq!(json["fields"]["player"], "76561198000000000");
        assert_eq!(json["plugin_instance_id"], instance.to_string());
        assert_eq!(json["plugin_name"], "Auto Ban");
        assert_eq!(json["plugin_id"], "auto-ban");
        assert_eq!(json["server_id"], server_id.to_string());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_serialize_console_frames() {
        let server_id = Uuid::new_v4();

        let output = Event::console_output(server_id, Some("ChatAdmin".to_string()), "hello");
        let json = serde_json::to_value(ServerMessage::from_event(&output)).unwrap();
        assert_eq!(json["type"], "console");
        assert_eq!(json["channel"], "ChatAdmin");
        assert_eq!(json["message"], "hello");

        let state = Event::console_state(
            server_id,
            ConnectionState::Failed,
            3,
            Some("refused".to_string()),
        );
        let json = serde_json::to_value(ServerMessage::from_event(&state)).unwrap();
        assert_eq!(json["type"], "console_state");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["generation"], 3);
        assert_eq!(json["error"], "refused");
    }

    #[test]
    fn test_serialize_ping() {
        let json = serde_json::to_string(&ServerMessage::ping(7)).unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains("\"dropped\":7"));
    }
}
