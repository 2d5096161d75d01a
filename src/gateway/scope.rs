//! Stream scopes
//!
//! A scope is what a client asked to watch: which kind of stream, on which
//! game server, optionally narrowed to one plugin instance. The broker
//! filters on type and server; the instance narrowing is applied by the
//! session on each event's payload.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::events::{Event, EventType, Filter};

/// Which events a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Plugin log records and plugin errors
    PluginLogs,
    /// Console output and console connection state
    Console,
}

impl StreamKind {
    pub fn event_types(&self) -> [EventType; 2] {
        match self {
            StreamKind::PluginLogs => [EventType::PluginLog, EventType::PluginError],
            StreamKind::Console => [EventType::ConsoleOutput, EventType::ConsoleState],
        }
    }
}

/// Errors for malformed scope parameters
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Invalid server id: {0}")]
    InvalidServerId(String),

    #[error("Invalid plugin instance id: {0}")]
    InvalidPluginInstanceId(String),

    #[error("Plugin instance scope is only supported on plugin log streams")]
    InstanceScopeUnsupported,
}

/// What one stream client is watching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamScope {
    pub kind: StreamKind,
    pub server_id: Uuid,
    pub plugin_instance_id: Option<Uuid>,
}

impl StreamScope {
    pub fn new(kind: StreamKind, server_id: Uuid, plugin_instance_id: Option<Uuid>) -> Self {
        Self {
            kind,
            server_id,
            plugin_instance_id,
        }
    }

    /// Build a scope from raw request parameters
    ///
    /// An empty plugin instance parameter means "all instances".
    pub fn parse(
        kind: StreamKind,
        server_id: &str,
        plugin_instance_id: Option<&str>,
    ) -> Result<Self, ScopeError> {
        let server_id = Uuid::parse_str(server_id.trim())
            .map_err(|_| ScopeError::InvalidServerId(server_id.to_string()))?;

        let plugin_instance_id = match plugin_instance_id.map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                Uuid::parse_str(raw)
                    .map_err(|_| ScopeError::InvalidPluginInstanceId(raw.to_string()))?,
            ),
        };

        if plugin_instance_id.is_some() && kind != StreamKind::PluginLogs {
            return Err(ScopeError::InstanceScopeUnsupported);
        }

        Ok(Self::new(kind, server_id, plugin_instance_id))
    }

    /// Broker-level filter for this scope
    pub fn filter(&self) -> Filter {
        Filter::new(self.kind.event_types(), [self.server_id])
    }

    /// Payload-level check applied after the broker filter
    ///
    /// With an instance scope, events that carry no plugin record are
    /// rejected rather than treated as errors.
    pub fn admits(&self, event: &Event) -> bool {
        match self.plugin_instance_id {
            None => true,
            Some(instance) => event
                .payload
                .plugin_record()
                .map_or(false, |record| record.plugin_instance_id == instance),
        }
    }
}
