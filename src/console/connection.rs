//! Per-server console connection state
//!
//! A `ConsoleConnection` tracks one game server's console: its target, its
//! lifecycle state and the generation counter that fences off readers from
//! superseded sessions. State transitions and generation checks happen under
//! one lock, and the matching broker publish happens inside it, so a reader
//! from an old generation can never publish after a newer dial began.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::{ConsoleError, ConsoleResult};
use super::transport::{ConsoleTarget, ConsoleWriter};
use crate::events::{Broker, Event};

/// Lifecycle state of a console connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Snapshot of a connection for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub server_id: Uuid,
    pub state: ConnectionState,
    pub generation: u64,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_since: Option<DateTime<Utc>>,
}

struct ConnectionInner {
    state: ConnectionState,
    generation: u64,
    last_error: Option<String>,
    /// Cancels the reader task of the live session
    session: Option<CancellationToken>,
    connected_since: Option<DateTime<Utc>>,
}

/// Writer of the live session, tagged with its generation
pub(crate) struct ActiveWriter {
    pub generation: u64,
    pub writer: Box<dyn ConsoleWriter>,
}

struct PendingCommand {
    generation: u64,
    reply: oneshot::Sender<ConsoleResult<String>>,
}

pub(crate) struct ConsoleConnection {
    server_id: Uuid,
    target: Mutex<ConsoleTarget>,
    inner: Mutex<ConnectionInner>,
    /// Held for the whole of a command, so one is in flight at a time
    pub(crate) writer: tokio::sync::Mutex<Option<ActiveWriter>>,
    pending: Mutex<Option<PendingCommand>>,
    /// Serializes dial attempts
    pub(crate) dial_lock: tokio::sync::Mutex<()>,
}

impl ConsoleConnection {
    pub fn new(server_id: Uuid, target: ConsoleTarget) -> Self {
        Self {
            server_id,
            target: Mutex::new(target),
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Disconnected,
                generation: 0,
                last_error: None,
                session: None,
                connected_since: None,
            }),
            writer: tokio::sync::Mutex::new(None),
            pending: Mutex::new(None),
            dial_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    pub fn target(&self) -> ConsoleTarget {
        self.target.lock().clone()
    }

    pub fn set_target(&self, target: ConsoleTarget) {
        *self.target.lock() = target;
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// True when `generation` is the live, connected session
    pub fn is_live(&self, generation: u64) -> bool {
        let inner = self.inner.lock();
        inner.generation == generation && inner.state == ConnectionState::Connected
    }

    /// Start a new dial: bump the generation, cancel any previous session
    /// and move to `Connecting`
    pub fn begin_dial(&self, broker: &Broker) -> u64 {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        if let Some(session) = inner.session.take() {
            session.cancel();
        }
        inner.state = ConnectionState::Connecting;
        inner.connected_since = None;
        broker.publish(Event::console_state(
            self.server_id,
            ConnectionState::Connecting,
            inner.generation,
            None,
        ));
        inner.generation
    }

    /// Move to `Connected` with the session's writer installed
    ///
    /// Returns false, dropping the writer, when `generation` was superseded
    /// while dialing.
    pub async fn activate(
        &self,
        broker: &Broker,
        generation: u64,
        writer: Box<dyn ConsoleWriter>,
        session: CancellationToken,
    ) -> bool {
        let mut slot = self.writer.lock().await;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            session.cancel();
            return false;
        }

        *slot = Some(ActiveWriter { generation, writer });
        inner.state = ConnectionState::Connected;
        inner.last_error = None;
        inner.session = Some(session);
        inner.connected_since = Some(Utc::now());
        broker.publish(Event::console_state(
            self.server_id,
            ConnectionState::Connected,
            generation,
            None,
        ));
        true
    }

    /// Transition within `generation`; ignored if it was superseded
    pub fn transition(
        &self,
        broker: &Broker,
        generation: u64,
        state: ConnectionState,
        error: Option<String>,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }

        inner.state = state;
        if state != ConnectionState::Connected {
            inner.connected_since = None;
        }
        if error.is_some() {
            inner.last_error = error.clone();
        }
        broker.publish(Event::console_state(self.server_id, state, generation, error));
        true
    }

    /// Publish on behalf of the reader of `generation`
    ///
    /// Returns false, publishing nothing, when that reader is stale.
    pub fn publish_if_current(&self, broker: &Broker, generation: u64, event: Event) -> bool {
        let inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        broker.publish(event);
        true
    }

    /// Explicit teardown: fence off the current session and go `Disconnected`
    ///
    /// Returns false when already disconnected.
    pub fn invalidate(&self, broker: &Broker) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Disconnected && inner.session.is_none() {
                return false;
            }

            inner.generation += 1;
            if let Some(session) = inner.session.take() {
                session.cancel();
            }
            inner.state = ConnectionState::Disconnected;
            inner.connected_since = None;
            broker.publish(Event::console_state(
                self.server_id,
                ConnectionState::Disconnected,
                inner.generation,
                None,
            ));
        }

        self.fail_pending(ConsoleError::Superseded);
        true
    }

    /// Register the reply slot for a command about to be sent
    ///
    /// The slot is only armed while `generation` is still the live session,
    /// checked under the state lock so a concurrent teardown either sees the
    /// slot and fails it or has already fenced it off. Returns false, leaving
    /// nothing pending, in the second case.
    pub fn arm_pending(
        &self,
        generation: u64,
        reply: oneshot::Sender<ConsoleResult<String>>,
    ) -> bool {
        let inner = self.inner.lock();
        if inner.generation != generation || inner.state != ConnectionState::Connected {
            return false;
        }
        *self.pending.lock() = Some(PendingCommand { generation, reply });
        true
    }

    pub fn clear_pending(&self) {
        self.pending.lock().take();
    }

    /// Hand a response frame to the command in flight
    ///
    /// Returns false if no command of that generation was waiting.
    pub fn complete_pending(&self, generation: u64, response: String) -> bool {
        let mut pending = self.pending.lock();
        match pending.take() {
            Some(cmd) if cmd.generation == generation => {
                let _ = cmd.reply.send(Ok(response));
                true
            }
            other => {
                *pending = other;
                false
            }
        }
    }

    /// Fail the command in flight, if any
    pub fn fail_pending(&self, error: ConsoleError) {
        if let Some(cmd) = self.pending.lock().take() {
            let _ = cmd.reply.send(Err(error));
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        let endpoint = self.target.lock().endpoint();
        let inner = self.inner.lock();
        ConnectionStatus {
            server_id: self.server_id,
            state: inner.state,
            generation: inner.generation,
            endpoint,
            last_error: inner.last_error.clone(),
            connected_since: inner.connected_since,
        }
    }
}
