//! Core event types for the Beacon relay
//!
//! This module defines the records that flow through the broker:
//! - `Event`: an immutable, timestamped fact about a game server or plugin
//! - `EventType`: the closed set of event type tags
//! - `EventPayload`: the typed body, one variant per `EventType`
//! - `PluginLogRecord` and `LogLevel`: structured plugin log output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::console::ConnectionState;

/// Type tag of an event
///
/// Filters match on this tag, so every payload variant has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A line of output from a game-server console
    ConsoleOutput,
    /// A console connection changed state
    ConsoleState,
    /// A plugin wrote a log record
    PluginLog,
    /// A plugin reported an error
    PluginError,
}

impl EventType {
    /// All event types, in declaration order
    pub const ALL: [EventType; 4] = [
        EventType::ConsoleOutput,
        EventType::ConsoleState,
        EventType::PluginLog,
        EventType::PluginError,
    ];

    /// Get the snake_case name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ConsoleOutput => "console_output",
            EventType::ConsoleState => "console_state",
            EventType::PluginLog => "plugin_log",
            EventType::PluginError => "plugin_error",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a plugin log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// A structured log record emitted by a plugin instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginLogRecord {
    /// The running plugin instance that produced the record
    pub plugin_instance_id: Uuid,
    /// Identifier of the plugin definition
    pub plugin_id: String,
    /// Human-readable plugin name
    pub plugin_name: String,
    /// Severity
    #[serde(default)]
    pub level: LogLevel,
    /// Log message text
    pub message: String,
    /// Error text, if the record describes a failure
    #[serde(default)]
    pub error: Option<String>,
    /// Structured key/value fields attached by the plugin
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl PluginLogRecord {
    /// Create a record with no error and no fields
    pub fn new(
        plugin_instance_id: Uuid,
        plugin_id: impl Into<String>,
        plugin_name: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            plugin_instance_id,
            plugin_id: plugin_id.into(),
            plugin_name: plugin_name.into(),
            level,
            message: message.into(),
            error: None,
            fields: serde_json::Map::new(),
        }
    }

    /// Builder method: attach error text
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Builder method: add a structured field
    pub fn field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Typed event body
///
/// The variant determines the event's `EventType`.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    ConsoleOutput {
        /// Console channel (chat, admin, ...) when the frame carried one
        channel: Option<String>,
        message: String,
    },
    ConsoleState {
        state: ConnectionState,
        /// Connection generation the transition belongs to
        generation: u64,
        /// Failure reason for transitions into `Failed`
        error: Option<String>,
    },
    PluginLog(PluginLogRecord),
    PluginError(PluginLogRecord),
}

impl EventPayload {
    /// The type tag for this payload
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::ConsoleOutput { .. } => EventType::ConsoleOutput,
            EventPayload::ConsoleState { .. } => EventType::ConsoleState,
            EventPayload::PluginLog(_) => EventType::PluginLog,
            EventPayload::PluginError(_) => EventType::PluginError,
        }
    }

    /// The plugin log record, for plugin payloads
    pub fn plugin_record(&self) -> Option<&PluginLogRecord> {
        match self {
            EventPayload::PluginLog(record) | EventPayload::PluginError(record) => Some(record),
            EventPayload::ConsoleOutput { .. } | EventPayload::ConsoleState { .. } => None,
        }
    }
}

/// An immutable event published through the broker
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Unique event identifier
    pub id: Uuid,
    /// Originating game server, `None` for process-global events
    pub server_id: Option<Uuid>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Typed body
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event stamped with the current time
    pub fn new(server_id: Option<Uuid>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Console output from a game server
    pub fn console_output(server_id: Uuid, channel: Option<String>, message: impl Into<String>) -> Self {
        Self::new(
            Some(server_id),
            EventPayload::ConsoleOutput {
                channel,
                message: message.into(),
            },
        )
    }

    /// Console connection state transition
    pub fn console_state(
        server_id: Uuid,
        state: ConnectionState,
        generation: u64,
        error: Option<String>,
    ) -> Self {
        Self::new(
            Some(server_id),
            EventPayload::ConsoleState {
                state,
                generation,
                error,
            },
        )
    }

    /// Plugin log record; records at `Error` level or carrying error text
    /// are published as `PluginError`
    pub fn plugin_log(server_id: Option<Uuid>, record: PluginLogRecord) -> Self {
        let payload = if record.level == LogLevel::Error || record.error.is_some() {
            EventPayload::PluginError(record)
        } else {
            EventPayload::PluginLog(record)
        };
        Self::new(server_id, payload)
    }

    /// Type tag of this event
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}
