//! Stream Routes
//!
//! Push streams of plugin logs and console output for one game server.
//!
//! - GET /api/v1/servers/:server_id/logs/stream - Plugin logs over SSE
//! - GET /api/v1/servers/:server_id/logs/ws - Plugin logs over WebSocket
//! - GET /api/v1/servers/:server_id/console/stream - Console over SSE
//! - GET /api/v1/servers/:server_id/console/ws - Console over WebSocket
//!
//! Log streams accept `?plugin_instance_id=` to narrow to one instance.

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::api::dto::StreamParams;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::gateway::{serve_websocket, sse_response, StreamKind, StreamScope, StreamSession};

/// GET /api/v1/servers/:server_id/logs/stream
pub async fn logs_sse(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Query(params): Query<StreamParams>,
) -> ApiResult<Response> {
    let session = open_session(&state, StreamKind::PluginLogs, &server_id, params).await?;
    Ok(sse_response(session).into_response())
}

/// GET /api/v1/servers/:server_id/logs/ws
pub async fn logs_ws(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Query(params): Query<StreamParams>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let session = open_session(&state, StreamKind::PluginLogs, &server_id, params).await?;
    Ok(ws.on_upgrade(move |socket| serve_websocket(socket, session)))
}

/// GET /api/v1/servers/:server_id/console/stream
pub async fn console_sse(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Query(params): Query<StreamParams>,
) -> ApiResult<Response> {
    let session = open_session(&state, StreamKind::Console, &server_id, params).await?;
    Ok(sse_response(session).into_response())
}

/// GET /api/v1/servers/:server_id/console/ws
pub async fn console_ws(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Query(params): Query<StreamParams>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let session = open_session(&state, StreamKind::Console, &server_id, params).await?;
    Ok(ws.on_upgrade(move |socket| serve_websocket(socket, session)))
}

/// Validate the request and subscribe
///
/// Console streams make sure the console is connected first; a dial
/// failure fails the request before anything is subscribed. Their second
/// frame is the connection state as of the subscription.
async fn open_session(
    state: &AppState,
    kind: StreamKind,
    server_id: &str,
    params: StreamParams,
) -> ApiResult<StreamSession> {
    if state.gateway.is_shut_down() {
        return Err(ApiError::ServiceUnavailable("Shutting down".to_string()));
    }

    let scope = StreamScope::parse(kind, server_id, params.plugin_instance_id.as_deref())?;
    state.require_server(scope.server_id)?;

    if kind == StreamKind::Console {
        let target = state
            .directory
            .target(scope.server_id)
            .ok_or_else(|| ApiError::NotFound(format!("Server {}", scope.server_id)))?;
        state.consoles.connect_to_server(scope.server_id, target).await?;
        let server_id = scope.server_id;
        return Ok(state
            .gateway
            .open_console(scope, || state.console_status(server_id)));
    }

    Ok(state.gateway.open(scope))
}
