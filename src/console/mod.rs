//! Game-server console connections
//!
//! - **ConsoleRegistry**: one persistent connection per game server;
//!   publishes console output and state transitions to the broker
//! - **Transport**: the dialer seam and the bundled line-oriented TCP dialer
//! - **Connection**: per-server state and the generation fence

mod connection;
mod error;
mod registry;
mod transport;

pub use connection::{ConnectionState, ConnectionStatus};
pub use error::{ConsoleError, ConsoleResult};
pub use registry::{ConsoleConfig, ConsoleRegistry};
pub use transport::{
    ConsoleDialer, ConsoleFrame, ConsoleReader, ConsoleSession, ConsoleTarget, ConsoleWriter,
    LineDialer,
};
