//! Plugin Routes
//!
//! - POST /api/v1/servers/:server_id/plugins/logs - Publish a plugin log record

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::dto::{PluginLogRequest, PluginLogResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::events::{Event, PluginLogRecord};

/// POST /api/v1/servers/:server_id/plugins/logs
///
/// Plugin runners report log records here; they are fanned out to every
/// matching log stream. Records at error level or carrying error text are
/// published as plugin errors.
pub async fn publish_log(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
    Json(req): Json<PluginLogRequest>,
) -> ApiResult<(StatusCode, Json<PluginLogResponse>)> {
    let server_id = state.known_server(&server_id)?;

    if req.plugin_id.trim().is_empty() {
        return Err(ApiError::Validation("plugin_id must not be empty".to_string()));
    }

    let mut record = PluginLogRecord::new(
        req.plugin_instance_id,
        req.plugin_id,
        req.plugin_name,
        req.level,
        req.message,
    );
    record.error = req.error;
    record.fields = req.fields;

    let event = Event::plugin_log(Some(server_id), record);
    let event_id = event.id;
    let delivered = state.broker.publish(event);

    tracing::trace!(server_id = %server_id, event_id = %event_id, delivered, "Plugin log published");

    Ok((
        StatusCode::ACCEPTED,
        Json(PluginLogResponse {
            event_id,
            delivered,
        }),
    ))
}
