//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::config::ApiConfig;
use crate::console::{ConnectionState, ConnectionStatus, ConsoleRegistry};
use crate::directory::ServerDirectory;
use crate::events::Broker;
use crate::gateway::Gateway;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Event broker shared by the console registry and the gateway
    pub broker: Broker,
    /// Console connections per game server
    pub consoles: ConsoleRegistry,
    /// Opens client stream sessions
    pub gateway: Gateway,
    /// Known game servers
    pub directory: Arc<ServerDirectory>,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        broker: Broker,
        consoles: ConsoleRegistry,
        gateway: Gateway,
        directory: ServerDirectory,
        config: ApiConfig,
    ) -> Self {
        Self {
            broker,
            consoles,
            gateway,
            directory: Arc::new(directory),
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Parse a server id path segment and check it is a known server
    pub fn known_server(&self, raw: &str) -> ApiResult<Uuid> {
        let id = Uuid::parse_str(raw.trim())
            .map_err(|_| ApiError::Validation(format!("Invalid server id: {}", raw)))?;
        self.require_server(id)
    }

    pub fn require_server(&self, id: Uuid) -> ApiResult<Uuid> {
        if self.directory.contains(id) {
            Ok(id)
        } else {
            Err(ApiError::NotFound(format!("Server {}", id)))
        }
    }

    /// Console status, or a disconnected placeholder for a server never dialed
    pub fn console_status(&self, server_id: Uuid) -> ConnectionStatus {
        self.consoles.status(server_id).unwrap_or_else(|| ConnectionStatus {
            server_id,
            state: ConnectionState::Disconnected,
            generation: 0,
            endpoint: self
                .directory
                .target(server_id)
                .map(|t| t.endpoint())
                .unwrap_or_default(),
            last_error: None,
            connected_since: None,
        })
    }
}
