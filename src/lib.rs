//! # Beacon
//!
//! Real-time event relay for game-server hosting: console output, console
//! connection state and plugin logs are published to one broker and pushed
//! to browser clients over WebSocket or Server-Sent Events.
//!
//! ## Modules
//!
//! - [`events`]: Events, filters and the publish/subscribe broker
//! - [`console`]: Persistent console connections with reconnect
//! - [`gateway`]: Per-client stream sessions and their transports
//! - [`api`]: HTTP API with Axum
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use beacon::console::{ConsoleConfig, ConsoleRegistry, ConsoleTarget, LineDialer};
//! use beacon::events::{Broker, BrokerConfig, EventType, Filter};
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Broker::new(BrokerConfig::default());
//!     let consoles = ConsoleRegistry::new(
//!         broker.clone(),
//!         Arc::new(LineDialer::default()),
//!         ConsoleConfig::default(),
//!     );
//!
//!     let server = Uuid::new_v4();
//!     let mut output = broker.subscribe(
//!         Filter::all()
//!             .with_type(EventType::ConsoleOutput)
//!             .with_server(server),
//!         None,
//!     );
//!
//!     consoles
//!         .connect_to_server(server, ConsoleTarget::new("127.0.0.1", 21025, "secret"))
//!         .await?;
//!     let players = consoles.send_command(server, "ListPlayers").await?;
//!     println!("{}", players);
//!
//!     while let Some(event) = output.recv().await {
//!         println!("{:?}", event.payload);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod console;
pub mod directory;
pub mod events;
pub mod gateway;

// Re-export top-level types for convenience
pub use events::{
    Broker, BrokerConfig, BrokerStats, Event, EventPayload, EventType, Filter, LogLevel,
    PluginLogRecord, Subscription, SubscriptionId,
};

pub use console::{
    ConnectionState, ConnectionStatus, ConsoleConfig, ConsoleError, ConsoleRegistry,
    ConsoleResult, ConsoleTarget, LineDialer,
};

pub use gateway::{Gateway, ServerMessage, StreamConfig, StreamKind, StreamScope, StreamSession};

pub use api::{build_router, serve, ApiError, AppState};

pub use config::{Config, ConfigError};
