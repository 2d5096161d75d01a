//! Stream Sessions
//!
//! One [`StreamSession`] per accepted client connection. Opening a session
//! subscribes to the broker and starts two tasks under the session's
//! cancellation token:
//!
//! - **delivery**: drains the subscription, applies the scope's payload
//!   check and forwards frames in queue order
//! - **keepalive**: emits a `ping` frame on a fixed interval
//!
//! Both feed one bounded outbound queue. The transport adapter is the only
//! reader of that queue and the only writer to the client.

use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::messages::ServerMessage;
use super::scope::StreamScope;
use crate::console::ConnectionStatus;
use crate::events::{Broker, DropCounter, Subscription, MAX_QUEUE_CAPACITY};

/// Stream gateway settings
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Interval between keepalive frames
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,

    /// Frames buffered between the session tasks and the client writer
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Broker queue capacity per stream; the broker default when unset
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

fn default_keepalive_ms() -> u64 {
    30_000
}

fn default_outbound_capacity() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_ms: default_keepalive_ms(),
            outbound_capacity: default_outbound_capacity(),
            queue_capacity: None,
        }
    }
}

impl StreamConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms.max(1))
    }
}

/// Lifecycle of a session; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connected,
    Streaming,
    Closing,
    Closed,
}

#[derive(Clone)]
struct SharedState(Arc<Mutex<SessionState>>);

impl SharedState {
    fn get(&self) -> SessionState {
        *self.0.lock()
    }

    fn advance(&self, session_id: Uuid, next: SessionState) {
        let mut state = self.0.lock();
        if next > *state {
            tracing::trace!(session_id = %session_id, from = ?*state, to = ?next, "Session state");
            *state = next;
        }
    }
}

/// Opens stream sessions against the broker. Cloning is cheap.
#[derive(Clone)]
pub struct Gateway {
    broker: Broker,
    config: StreamConfig,
    /// Parent of every session token
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(broker: Broker, config: StreamConfig) -> Self {
        Self {
            broker,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Subscribe for `scope` and start the session tasks
    ///
    /// The first frame on the returned session is the `connected`
    /// acknowledgement. Must be called within a tokio runtime.
    pub fn open(&self, scope: StreamScope) -> StreamSession {
        self.start(scope, || None)
    }

    /// Open a console stream, following the acknowledgement with the
    /// connection's current state
    ///
    /// `status` is read once the subscription exists, so a transition racing
    /// the open is either in the snapshot or queued after it.
    pub fn open_console(
        &self,
        scope: StreamScope,
        status: impl FnOnce() -> ConnectionStatus,
    ) -> StreamSession {
        self.start(scope, || Some(ServerMessage::console_status(&status())))
    }

    fn start(
        &self,
        scope: StreamScope,
        snapshot: impl FnOnce() -> Option<ServerMessage>,
    ) -> StreamSession {
        let id = Uuid::new_v4();
        let cancel = self.shutdown.child_token();
        let state = SharedState(Arc::new(Mutex::new(SessionState::Connected)));

        let subscription = self
            .broker
            .subscribe(scope.filter(), self.config.queue_capacity);
        let dropped = subscription.drop_counter();

        let (outbound_tx, outbound_rx) =
            mpsc::channel(self.config.outbound_capacity.clamp(2, MAX_QUEUE_CAPACITY));
        // Empty channel with room for both, so these cannot fail
        let _ = outbound_tx.try_send(ServerMessage::connected(id, &scope));
        if let Some(snapshot) = snapshot() {
            let _ = outbound_tx.try_send(snapshot);
        }

        state.advance(id, SessionState::Streaming);
        tracing::info!(
            session_id = %id,
            stream = ?scope.kind,
            server_id = %scope.server_id,
            plugin_instance_id = ?scope.plugin_instance_id,
            subscription_id = subscription.id(),
            "Stream opened"
        );

        tokio::spawn(deliver(
            id,
            subscription,
            scope.clone(),
            outbound_tx.clone(),
            cancel.clone(),
            state.clone(),
        ));
        tokio::spawn(keepalive(
            outbound_tx,
            self.config.keepalive_interval(),
            dropped,
            cancel.clone(),
        ));

        StreamSession {
            id,
            scope,
            outbound: outbound_rx,
            cancel,
            state,
        }
    }

    /// Close every open session
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Client-facing end of one stream
///
/// Dropping it closes the stream.
pub struct StreamSession {
    id: Uuid,
    scope: StreamScope,
    outbound: mpsc::Receiver<ServerMessage>,
    cancel: CancellationToken,
    state: SharedState,
}

impl StreamSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scope(&self) -> &StreamScope {
        &self.scope
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Token that ends the session when cancelled
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next frame for the client; `None` once the session has ended
    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        self.outbound.recv().await
    }

    /// Begin closing: stops both tasks and releases the subscription
    pub fn close(&self) {
        self.state.advance(self.id, SessionState::Closing);
        self.cancel.cancel();
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.state.advance(self.id, SessionState::Closed);
        tracing::info!(session_id = %self.id, server_id = %self.scope.server_id, "Stream closed");
    }
}

async fn deliver(
    session_id: Uuid,
    mut subscription: Subscription,
    scope: StreamScope,
    outbound: mpsc::Sender<ServerMessage>,
    cancel: CancellationToken,
    state: SharedState,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = subscription.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if !scope.admits(&event) {
            tracing::trace!(session_id = %session_id, event_id = %event.id, "Event outside stream scope");
            continue;
        }

        let message = ServerMessage::from_event(&event);
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = outbound.send(message) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    state.advance(session_id, SessionState::Closing);
    let dropped = subscription.dropped();
    subscription.unsubscribe();
    cancel.cancel();

    tracing::debug!(
        session_id = %session_id,
        subscription_id = subscription.id(),
        dropped,
        "Stream delivery stopped"
    );
}

async fn keepalive(
    outbound: mpsc::Sender<ServerMessage>,
    period: Duration,
    dropped: DropCounter,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let ping = ServerMessage::ping(dropped.get());
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = outbound.send(ping) => {
                if sent.is_err() {
                    cancel.cancel();
                    break;
                }
            }
        }
    }
}
