//! Console Connection Registry
//!
//! Keeps one persistent console connection per game server. Inbound output
//! frames are published to the [`Broker`] as `ConsoleOutput` events and
//! every state transition as a `ConsoleState` event.
//!
//! A session that drops after being connected is redialed in the
//! background with exponential backoff, up to a configured number of
//! attempts. A dial requested by a caller is never retried on its behalf.

use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::connection::{ConnectionState, ConnectionStatus, ConsoleConnection};
use super::error::{ConsoleError, ConsoleResult};
use super::transport::{ConsoleDialer, ConsoleFrame, ConsoleReader, ConsoleTarget};
use crate::events::{Broker, Event};

/// Console connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    /// Upper bound for dialing and authenticating
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Upper bound for a command's response
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Delay before the first reconnect attempt; doubles per attempt
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Cap on the reconnect delay
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,

    /// Reconnect attempts after a drop before giving up (0 disables)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_command_timeout() -> u64 {
    10_000
}

fn default_reconnect_delay() -> u64 {
    1_000
}

fn default_max_reconnect_delay() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            command_timeout_ms: default_command_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl ConsoleConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Backoff before reconnect attempt `attempt` (0-based)
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let delay = std::cmp::min(
            self.reconnect_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt)),
            self.max_reconnect_delay_ms,
        );
        Duration::from_millis(delay)
    }
}

/// Why a dial is happening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DialTrigger {
    /// A caller asked for the connection
    Request,
    /// Background recovery after a drop
    Recovery,
}

/// Registry of console connections. Cloning is cheap.
#[derive(Clone)]
pub struct ConsoleRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    broker: Broker,
    dialer: Arc<dyn ConsoleDialer>,
    config: ConsoleConfig,
    /// Active connections: server id → connection
    connections: Mutex<HashMap<Uuid, Arc<ConsoleConnection>>>,
    /// Parent of every session token
    shutdown: CancellationToken,
}

impl ConsoleRegistry {
    /// Create a registry publishing to `broker`
    pub fn new(broker: Broker, dialer: Arc<dyn ConsoleDialer>, config: ConsoleConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                broker,
                dialer,
                config,
                connections: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Ensure a live console connection for `server_id`
    ///
    /// Returns immediately when already connected. Otherwise dials once and
    /// reports the failure to the caller.
    pub async fn connect_to_server(
        &self,
        server_id: Uuid,
        target: ConsoleTarget,
    ) -> ConsoleResult<()> {
        let conn = {
            let mut connections = self.inner.connections.lock();
            let conn = connections
                .entry(server_id)
                .or_insert_with(|| Arc::new(ConsoleConnection::new(server_id, target.clone())));
            Arc::clone(conn)
        };

        if conn.state() == ConnectionState::Connected {
            return Ok(());
        }
        if conn.target() != target {
            conn.set_target(target);
        }

        self.inner.establish(&conn, DialTrigger::Request).await
    }

    /// Send a command and wait for its response
    pub async fn send_command(&self, server_id: Uuid, command: &str) -> ConsoleResult<String> {
        let conn = self
            .inner
            .get(server_id)
            .ok_or(ConsoleError::NotConnected(server_id))?;

        let mut writer = conn.writer.lock().await;
        let active = match writer.as_mut() {
            Some(active) if conn.is_live(active.generation) => active,
            _ => return Err(ConsoleError::NotConnected(server_id)),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if !conn.arm_pending(active.generation, reply_tx) {
            // Torn down since the liveness check
            return Err(ConsoleError::Superseded);
        }

        if let Err(e) = active.writer.send_command(command).await {
            conn.clear_pending();
            tracing::warn!(server_id = %server_id, error = %e, "Failed to send console command");
            return Err(e);
        }

        tracing::debug!(server_id = %server_id, command = %command, "Console command sent");

        match tokio::time::timeout(self.inner.config.command_timeout(), reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConsoleError::Superseded),
            Err(_) => {
                conn.clear_pending();
                Err(ConsoleError::CommandTimeout)
            }
        }
    }

    /// Tear down the connection for `server_id`; a no-op if not connected
    pub async fn disconnect(&self, server_id: Uuid) {
        if let Some(conn) = self.inner.get(server_id) {
            self.inner.teardown(&conn).await;
        }
    }

    /// Drop the current session and dial again with the remembered target
    pub async fn reconnect(&self, server_id: Uuid) -> ConsoleResult<()> {
        let conn = self
            .inner
            .get(server_id)
            .ok_or(ConsoleError::NotConnected(server_id))?;

        self.inner.teardown(&conn).await;
        self.inner.establish(&conn, DialTrigger::Request).await
    }

    /// Status of one connection
    pub fn status(&self, server_id: Uuid) -> Option<ConnectionStatus> {
        self.inner.get(server_id).map(|conn| conn.status())
    }

    /// Status of every known connection
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        let connections: Vec<_> = self.inner.connections.lock().values().cloned().collect();
        connections.iter().map(|conn| conn.status()).collect()
    }

    /// Number of connections currently `Connected`
    pub fn connected_count(&self) -> usize {
        let connections: Vec<_> = self.inner.connections.lock().values().cloned().collect();
        connections
            .iter()
            .filter(|conn| conn.state() == ConnectionState::Connected)
            .count()
    }

    /// Disconnect everything and stop background recovery
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let connections: Vec<_> = self
            .inner
            .connections
            .lock()
            .drain()
            .map(|(_, conn)| conn)
            .collect();

        for conn in &connections {
            self.inner.teardown(conn).await;
        }

        tracing::info!(connections = connections.len(), "Console registry shut down");
    }
}

impl RegistryInner {
    fn get(&self, server_id: Uuid) -> Option<Arc<ConsoleConnection>> {
        self.connections.lock().get(&server_id).cloned()
    }

    async fn teardown(&self, conn: &ConsoleConnection) {
        if conn.invalidate(&self.broker) {
            tracing::info!(server_id = %conn.server_id(), "Console disconnected");
        }
        conn.writer.lock().await.take();
    }

    /// Dial `conn` unless it is already connected
    async fn establish(
        self: &Arc<Self>,
        conn: &Arc<ConsoleConnection>,
        trigger: DialTrigger,
    ) -> ConsoleResult<()> {
        let _dialing = conn.dial_lock.lock().await;

        match conn.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Disconnected if trigger == DialTrigger::Recovery => {
                return Err(ConsoleError::Superseded);
            }
            _ => {}
        }
        if self.shutdown.is_cancelled() {
            return Err(ConsoleError::Superseded);
        }

        let server_id = conn.server_id();
        let target = conn.target();
        let generation = conn.begin_dial(&self.broker);

        tracing::info!(
            server_id = %server_id,
            endpoint = %target.endpoint(),
            generation,
            "Connecting to console"
        );

        let dialed = tokio::time::timeout(self.config.connect_timeout(), self.dialer.dial(&target))
            .await
            .unwrap_or_else(|_| Err(ConsoleError::ConnectTimeout(target.endpoint())));

        let session = match dialed {
            Ok(session) => session,
            Err(e) => {
                conn.transition(
                    &self.broker,
                    generation,
                    ConnectionState::Failed,
                    Some(e.to_string()),
                );
                tracing::warn!(
                    server_id = %server_id,
                    generation,
                    error = %e,
                    "Console connection failed"
                );
                return Err(e);
            }
        };

        let session_token = self.shutdown.child_token();
        if !conn
            .activate(&self.broker, generation, session.writer, session_token.clone())
            .await
        {
            return Err(ConsoleError::Superseded);
        }

        tracing::info!(server_id = %server_id, generation, "Console connected");

        self.spawn_reader(Arc::clone(conn), generation, session.reader, session_token);
        Ok(())
    }

    fn spawn_reader(
        self: &Arc<Self>,
        conn: Arc<ConsoleConnection>,
        generation: u64,
        reader: Box<dyn ConsoleReader>,
        session: CancellationToken,
    ) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            registry.run_reader(conn, generation, reader, session).await;
        });
    }

    /// Reader task for one session generation
    async fn run_reader(
        self: Arc<Self>,
        conn: Arc<ConsoleConnection>,
        generation: u64,
        mut reader: Box<dyn ConsoleReader>,
        session: CancellationToken,
    ) {
        let server_id = conn.server_id();

        let reason = loop {
            let frame = tokio::select! {
                _ = session.cancelled() => {
                    tracing::debug!(server_id = %server_id, generation, "Console reader cancelled");
                    return;
                }
                frame = reader.next_frame() => frame,
            };

            match frame {
                Ok(Some(ConsoleFrame::Output { channel, message })) => {
                    let event = Event::console_output(server_id, channel, message);
                    if !conn.publish_if_current(&self.broker, generation, event) {
                        tracing::debug!(server_id = %server_id, generation, "Stale console reader exiting");
                        return;
                    }
                }
                Ok(Some(ConsoleFrame::Response(body))) => {
                    if !conn.complete_pending(generation, body.clone()) {
                        // Unsolicited response: surface it as output
                        let event = Event::console_output(server_id, None, body);
                        if !conn.publish_if_current(&self.broker, generation, event) {
                            return;
                        }
                    }
                }
                Ok(None) => break "connection closed by remote".to_string(),
                Err(e) => break e.to_string(),
            }
        };

        if !conn.transition(
            &self.broker,
            generation,
            ConnectionState::Failed,
            Some(reason.clone()),
        ) {
            return;
        }

        tracing::warn!(server_id = %server_id, generation, reason = %reason, "Console connection lost");
        conn.fail_pending(ConsoleError::Closed);
        self.recover(conn).await;
    }

    /// Bounded reconnect sequence after a drop
    async fn recover(self: Arc<Self>, conn: Arc<ConsoleConnection>) {
        let server_id = conn.server_id();
        let attempts = self.config.max_reconnect_attempts;

        for attempt in 0..attempts {
            let delay = self.config.reconnect_delay(attempt);
            tracing::info!(
                server_id = %server_id,
                attempt = attempt + 1,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting console"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            // Someone else connected it, or it was torn down
            if conn.state() != ConnectionState::Failed {
                return;
            }

            match self.establish(&conn, DialTrigger::Recovery).await {
                Ok(()) => return,
                Err(ConsoleError::Superseded) => return,
                Err(e) => {
                    tracing::debug!(server_id = %server_id, attempt = attempt + 1, error = %e, "Reconnect attempt failed");
                }
            }
        }

        if attempts > 0 {
            tracing::warn!(
                server_id = %server_id,
                attempts,
                "Giving up reconnecting console"
            );
        }
    }
}
