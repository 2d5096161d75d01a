//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{BrokerStats, LogLevel};

// ============================================
// STREAM DTOs
// ============================================

/// Query parameters accepted by stream endpoints
#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// Narrow a plugin log stream to one plugin instance
    #[serde(default)]
    pub plugin_instance_id: Option<String>,
}

// ============================================
// CONSOLE DTOs
// ============================================

/// Connect request; every field overrides the configured target
#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Console command request
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// Console command response
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub server_id: Uuid,
    pub command: String,
    pub response: String,
}

// ============================================
// PLUGIN DTOs
// ============================================

/// A log record reported by a plugin runner
#[derive(Debug, Deserialize)]
pub struct PluginLogRequest {
    pub plugin_instance_id: Uuid,
    pub plugin_id: String,
    #[serde(default)]
    pub plugin_name: String,
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Result of publishing a plugin log record
#[derive(Debug, Serialize)]
pub struct PluginLogResponse {
    pub event_id: Uuid,
    /// Subscribers the record was queued for
    pub delivered: usize,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "healthy" or "shutting_down"
    pub status: String,
    pub broker: BrokerStats,
    pub consoles: ConsoleHealth,
    pub uptime_seconds: u64,
    pub version: String,
}

/// Console connection counts
#[derive(Debug, Serialize)]
pub struct ConsoleHealth {
    /// Servers in the directory
    pub servers: usize,
    /// Connections tracked by the registry
    pub connections: usize,
    /// Connections currently connected
    pub connected: usize,
}
