//! Console Routes
//!
//! Manual control of game-server console connections.
//!
//! - POST /api/v1/servers/:server_id/console/connect - Connect if not connected
//! - POST /api/v1/servers/:server_id/console/command - Send a command
//! - DELETE /api/v1/servers/:server_id/console - Disconnect
//! - GET /api/v1/servers/:server_id/console/status - Connection status

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::dto::{CommandRequest, CommandResponse, ConnectRequest};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::console::ConnectionStatus;

/// POST /api/v1/servers/:server_id/console/connect
///
/// The body is optional; any field given overrides the configured target.
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    body: Option<Json<ConnectRequest>>,
) -> ApiResult<Json<ConnectionStatus>> {
    let server_id = state.known_server(&server_id)?;
    let mut target = state
        .directory
        .target(server_id)
        .ok_or_else(|| ApiError::NotFound(format!("Server {}", server_id)))?;

    if let Some(Json(overrides)) = body {
        if let Some(address) = overrides.address {
            target.address = address;
        }
        if let Some(port) = overrides.port {
            target.port = port;
        }
        if let Some(credential) = overrides.credential {
            target.credential = credential;
        }
    }

    state.consoles.connect_to_server(server_id, target).await?;
    Ok(Json(state.console_status(server_id)))
}

/// POST /api/v1/servers/:server_id/console/command
pub async fn command(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> ApiResult<Json<CommandResponse>> {
    let server_id = state.known_server(&server_id)?;

    let command = req.command.trim();
    if command.is_empty() {
        return Err(ApiError::Validation("command must not be empty".to_string()));
    }
    if command.contains(['\r', '\n']) {
        return Err(ApiError::Validation("command must be a single line".to_string()));
    }

    let response = state.consoles.send_command(server_id, command).await?;

    Ok(Json(CommandResponse {
        server_id,
        command: command.to_string(),
        response,
    }))
}

/// DELETE /api/v1/servers/:server_id/console
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> ApiResult<StatusCode> {
    let server_id = state.known_server(&server_id)?;
    state.consoles.disconnect(server_id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/servers/:server_id/console/status
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> ApiResult<Json<ConnectionStatus>> {
    let server_id = state.known_server(&server_id)?;
    Ok(Json(state.console_status(server_id)))
}
