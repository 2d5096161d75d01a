//! Streaming Gateway
//!
//! Per-client push streams over WebSocket and Server-Sent Events.
//!
//! ## Architecture
//!
//! - **Scope**: what the client watches (stream kind, game server,
//!   optional plugin instance)
//! - **Session**: broker subscription plus delivery and keepalive tasks
//!   feeding one bounded outbound queue
//! - **Transports**: the WebSocket and SSE adapters drain that queue and
//!   are the only writers to the client
//!
//! ## Message Format
//!
//! ```json
//! {"type": "connected", "session_id": "...", "stream": "plugin_logs", "server_id": "..."}
//! {"type": "log", "id": "...", "level": "info", "message": "...", "plugin_instance_id": "...", ...}
//! {"type": "console", "id": "...", "server_id": "...", "message": "..."}
//! {"type": "console_state", "id": "...", "state": "connected", "generation": 1}
//! {"type": "ping", "timestamp": "...", "dropped": 0}
//! ```

mod messages;
mod scope;
mod session;
mod sse;
mod websocket;

pub use messages::ServerMessage;
pub use scope::{ScopeError, StreamKind, StreamScope};
pub use session::{Gateway, SessionState, StreamConfig, StreamSession};
pub use sse::sse_response;
pub use websocket::serve_websocket;
