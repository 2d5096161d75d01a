//! Event Broker
//!
//! Process-wide publish/subscribe hub. Producers call [`Broker::publish`];
//! consumers hold a [`Subscription`] whose bounded queue receives every
//! event its [`Filter`] accepts.
//!
//! Publishing never blocks: when a subscriber's queue is full the incoming
//! event is dropped for that subscriber only (drop-newest) and counted.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::filter::Filter;
use super::types::Event;

/// Unique identifier for a subscription
pub type SubscriptionId = u64;

/// Largest queue a subscription may ask for
///
/// Requests above this are clamped; tokio channels cannot be sized
/// anywhere near `usize::MAX`.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// Configuration for the broker
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Queue capacity used when `subscribe` is not given one
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    100
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Broker counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Currently registered subscriptions
    pub subscriptions: usize,
    /// Events passed to `publish`
    pub published: u64,
    /// Successful enqueues across all subscribers
    pub delivered: u64,
    /// Events discarded because a subscriber queue was full
    pub dropped: u64,
}

/// Shared handle to the broker. Cloning is cheap.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    /// Active subscriptions: SubscriptionId → Slot
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<Slot>>>,
    next_id: AtomicU64,
    config: BrokerConfig,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Producer side of one subscription
struct Slot {
    id: SubscriptionId,
    filter: Filter,
    /// `None` once unsubscribed. Taken under this lock so no offer can race
    /// past an unsubscribe.
    sender: Mutex<Option<mpsc::Sender<Arc<Event>>>>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
    /// Set while the queue is overflowing, so a burst logs once
    overflowing: AtomicBool,
}

enum Offer {
    Delivered,
    Dropped,
    Closed,
}

impl Slot {
    fn offer(&self, event: &Arc<Event>) -> Offer {
        let result = {
            let sender = self.sender.lock();
            match sender.as_ref() {
                Some(tx) => tx.try_send(Arc::clone(event)),
                None => return Offer::Closed,
            }
        };

        match result {
            Ok(()) => {
                self.overflowing.store(false, Ordering::Relaxed);
                Offer::Delivered
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.overflowing.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        subscription_id = self.id,
                        event_type = %event.event_type(),
                        dropped_total = dropped,
                        "Subscriber queue full, dropping events"
                    );
                }
                Offer::Dropped
            }
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    fn close(&self) {
        self.sender.lock().take();
        self.cancel.cancel();
    }
}

impl Broker {
    /// Create a new broker
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                subscriptions: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                config,
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscription
    ///
    /// `capacity` defaults to the configured queue capacity and is clamped
    /// to `1..=MAX_QUEUE_CAPACITY`.
    pub fn subscribe(&self, filter: Filter, capacity: Option<usize>) -> Subscription {
        let capacity = capacity
            .unwrap_or(self.inner.config.queue_capacity)
            .clamp(1, MAX_QUEUE_CAPACITY);
        let (tx, rx) = mpsc::channel(capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let slot = Arc::new(Slot {
            id,
            filter,
            sender: Mutex::new(Some(tx)),
            cancel: CancellationToken::new(),
            dropped: Arc::new(AtomicU64::new(0)),
            overflowing: AtomicBool::new(false),
        });

        self.inner
            .subscriptions
            .write()
            .insert(id, Arc::clone(&slot));

        tracing::debug!(
            subscription_id = id,
            capacity,
            types = ?slot.filter.types(),
            servers = ?slot.filter.servers(),
            "Subscribed"
        );

        Subscription {
            id,
            receiver: rx,
            slot,
            broker: self.clone(),
        }
    }

    /// Remove a subscription
    ///
    /// Unknown or already-removed ids are ignored. Once this returns the
    /// subscription's queue receives nothing more and its consumer sees
    /// end-of-stream after draining what was already buffered.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let slot = self.inner.subscriptions.write().remove(&id);

        if let Some(slot) = slot {
            slot.close();
            tracing::debug!(
                subscription_id = id,
                dropped = slot.dropped.load(Ordering::Relaxed),
                "Unsubscribed"
            );
        }
    }

    /// Fan an event out to every matching subscription
    ///
    /// Returns the number of subscriber queues the event was placed in.
    pub fn publish(&self, event: Event) -> usize {
        let event = Arc::new(event);
        let event_type = event.event_type();
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<Arc<Slot>> = {
            let subs = self.inner.subscriptions.read();
            subs.values()
                .filter(|slot| slot.filter.matches(&event))
                .cloned()
                .collect()
        };

        let mut delivered = 0;
        for slot in &targets {
            match slot.offer(&event) {
                Offer::Delivered => delivered += 1,
                Offer::Dropped => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Offer::Closed => {}
            }
        }
        self.inner
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);

        if delivered > 0 {
            tracing::trace!(
                event_id = %event.id,
                event_type = %event_type,
                subscribers = delivered,
                "Published event"
            );
        }

        delivered
    }

    /// Remove every subscription, waking all consumers
    pub fn close_all(&self) {
        let slots: Vec<Arc<Slot>> = self
            .inner
            .subscriptions
            .write()
            .drain()
            .map(|(_, slot)| slot)
            .collect();

        for slot in &slots {
            slot.close();
        }

        if !slots.is_empty() {
            tracing::info!(subscriptions = slots.len(), "Closed all subscriptions");
        }
    }

    /// Get the current subscription count
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    /// Snapshot the broker counters
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            subscriptions: self.subscription_count(),
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

/// Consumer side of a subscription
///
/// Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<Arc<Event>>,
    slot: Arc<Slot>,
    broker: Broker,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.recv().await
    }

    /// Take the next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.try_recv().ok()
    }

    /// Token cancelled when the subscription is removed
    pub fn cancellation(&self) -> CancellationToken {
        self.slot.cancel.clone()
    }

    /// Events dropped for this subscriber because its queue was full
    pub fn dropped(&self) -> u64 {
        self.slot.dropped.load(Ordering::Relaxed)
    }

    /// Shareable view of the dropped-event count
    pub fn drop_counter(&self) -> DropCounter {
        DropCounter(Arc::clone(&self.slot.dropped))
    }

    /// Remove this subscription from the broker
    pub fn unsubscribe(&self) {
        self.broker.unsubscribe(self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.unsubscribe(self.id);
    }
}

/// Read-only handle on a subscription's dropped-event count
#[derive(Debug, Clone)]
pub struct DropCounter(Arc<AtomicU64>);

impl DropCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{EventPayload, EventType, LogLevel, PluginLogRecord};
    use std::time::{Duration, Instant};
    use uuid::Uuid;

    fn plugin_event(server: Uuid, message: &str) -> Event {
        let record =
            PluginLogRecord::new(Uuid::new_v4(), "plugin", "Plugin", LogLevel::Info, message);
        Event::plugin_log(Some(server), record)
    }

    fn message_of(event: &Event) -> &str {
        match &event.payload {
            EventPayload::PluginLog(record) | EventPayload::PluginError(record) => &record.message,
            EventPayload::ConsoleOutput { message, .. } => message,
            EventPayload::ConsoleState { .. } => "",
        }
    }

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.queue_capacity, 100);
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let broker = Broker::default();
        let sub = broker.subscribe(Filter::all(), None);
        assert_eq!(broker.subscription_count(), 1);

        broker.unsubscribe(sub.id());
        assert_eq!(broker.subscription_count(), 0);
        assert!(sub.cancellation().is_cancelled());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broker = Broker::default();
        {
            let _sub = broker.subscribe(Filter::all(), None);
            assert_eq!(broker.subscription_count(), 1);
        }
        assert_eq!(broker.subscription_count(), 0);
    }

    #[test]
    fn test_type_and_server_scenario() {
        let broker = Broker::default();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let mut sub = broker.subscribe(Filter::new([EventType::PluginLog], [s1]), None);

        assert_eq!(broker.publish(plugin_event(s1, "for s1")), 1);
        assert_eq!(broker.publish(plugin_event(s2, "for s2")), 0);
        assert_eq!(
            broker.publish(Event::console_state(
                s1,
                crate::console::ConnectionState::Connected,
                1,
                None
            )),
            0
        );

        let received = sub.try_recv().unwrap();
        assert_eq!(message_of(&received), "for s1");
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_global_event_matches_server_filter() {
        let broker = Broker::default();
        let mut sub = broker.subscribe(Filter::all().with_server(Uuid::new_v4()), None);

        let record =
            PluginLogRecord::new(Uuid::new_v4(), "plugin", "Plugin", LogLevel::Info, "global");
        broker.publish(Event::plugin_log(None, record));

        assert!(sub.try_recv().is_some());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let broker = Broker::default();
        assert_eq!(broker.publish(plugin_event(Uuid::new_v4(), "nobody")), 0);
        assert_eq!(broker.stats().published, 1);
    }

    #[test]
    fn test_fifo_within_subscriber() {
        let broker = Broker::default();
        let server = Uuid::new_v4();
        let mut sub = broker.subscribe(Filter::all(), Some(10));

        for i in 0..10 {
            broker.publish(plugin_event(server, &i.to_string()));
        }
        for i in 0..10 {
            let event = sub.try_recv().unwrap();
            assert_eq!(message_of(&event), i.to_string());
        }
    }

    #[test]
    fn test_overflow_drops_newest() {
        let broker = Broker::default();
        let server = Uuid::new_v4();
        let capacity = 3;
        let extra = 4;
        let mut sub = broker.subscribe(Filter::all(), Some(capacity));

        for i in 0..capacity + extra {
            broker.publish(plugin_event(server, &format!("event-{}", i)));
        }

        let mut retained = Vec::new();
        while let Some(event) = sub.try_recv() {
            retained.push(message_of(&event).to_string());
        }
        assert_eq!(retained, vec!["event-0", "event-1", "event-2"]);
        assert_eq!(sub.dropped(), extra as u64);
        assert_eq!(sub.drop_counter().get(), extra as u64);
        assert_eq!(broker.stats().dropped, extra as u64);
    }

    #[test]
    fn test_overflow_is_per_subscriber() {
        let broker = Broker::default();
        let server = Uuid::new_v4();
        let mut small = broker.subscribe(Filter::all(), Some(1));
        let mut large = broker.subscribe(Filter::all(), Some(10));

        for i in 0..5 {
            broker.publish(plugin_event(server, &i.to_string()));
        }

        assert_eq!(small.dropped(), 4);
        assert_eq!(large.dropped(), 0);
        assert!(small.try_recv().is_some());
        assert!(small.try_recv().is_none());
        for _ in 0..5 {
            assert!(large.try_recv().is_some());
        }
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let broker = Broker::default();
        let mut sub = broker.subscribe(Filter::all(), Some(0));
        broker.publish(plugin_event(Uuid::new_v4(), "one"));
        broker.publish(plugin_event(Uuid::new_v4(), "two"));
        assert_eq!(message_of(&sub.try_recv().unwrap()), "one");
        assert_eq!(sub.dropped(), 1);
    }

    #[test]
    fn test_oversized_capacity_clamped() {
        let broker = Broker::default();
        let mut sub = broker.subscribe(Filter::all(), Some(usize::MAX));
        broker.publish(plugin_event(Uuid::new_v4(), "one"));
        assert_eq!(message_of(&sub.try_recv().unwrap()), "one");

        let broker = Broker::new(BrokerConfig {
            queue_capacity: usize::MAX,
        });
        let mut sub = broker.subscribe(Filter::all(), None);
        broker.publish(plugin_event(Uuid::new_v4(), "two"));
        assert_eq!(message_of(&sub.try_recv().unwrap()), "two");
        assert_eq!(sub.dropped(), 0);
    }

    #[test]
    fn test_publish_non_blocking_with_full_queues() {
        let broker = Broker::default();
        let server = Uuid::new_v4();
        let subs: Vec<_> = (0..50)
            .map(|_| broker.subscribe(Filter::all(), Some(1)))
            .collect();

        // Fill every queue
        broker.publish(plugin_event(server, "fill"));

        let start = Instant::now();
        for _ in 0..1_000 {
            assert_eq!(broker.publish(plugin_event(server, "overflow")), 0);
        }
        assert!(start.elapsed() < Duration::from_secs(5));

        for sub in &subs {
            assert_eq!(sub.dropped(), 1_000);
        }
    }

    #[test]
    fn test_unsubscribe_idempotent() {
        let broker = Broker::default();
        let sub = broker.subscribe(Filter::all(), None);

        broker.unsubscribe(sub.id());
        broker.unsubscribe(sub.id());
        broker.unsubscribe(9_999);
        sub.unsubscribe();
        drop(sub);

        assert_eq!(broker.subscription_count(), 0);
    }

    #[test]
    fn test_unsubscribe_finality() {
        let broker = Broker::default();
        let server = Uuid::new_v4();
        let mut sub = broker.subscribe(Filter::all(), Some(16));

        broker.publish(plugin_event(server, "before"));
        broker.unsubscribe(sub.id());

        // Already-buffered events may still drain
        assert_eq!(message_of(&sub.try_recv().unwrap()), "before");
        assert!(sub.try_recv().is_none());

        for _ in 0..10 {
            assert_eq!(broker.publish(plugin_event(server, "after")), 0);
        }
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_unsubscribe_finality_under_concurrent_publish() {
        let broker = Broker::default();
        let server = Uuid::new_v4();

        for _ in 0..20 {
            let mut sub = broker.subscribe(Filter::all(), Some(1_000_000));
            let publisher = {
                let broker = broker.clone();
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        broker.publish(plugin_event(server, "x"));
                    }
                })
            };

            std::thread::sleep(Duration::from_millis(1));
            broker.unsubscribe(sub.id());

            // Drain everything enqueued before unsubscribe returned
            let mut drained = 0usize;
            while sub.try_recv().is_some() {
                drained += 1;
            }
            publisher.join().unwrap();

            // Nothing may appear afterwards
            assert!(sub.try_recv().is_none(), "late delivery after {} events", drained);
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_wakes_blocked_consumer() {
        let broker = Broker::default();
        let mut sub = broker.subscribe(Filter::all(), None);
        let id = sub.id();

        let waiter = tokio::spawn(async move { sub.recv().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.unsubscribe(id);

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("consumer was not woken")
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_close_all() {
        let broker = Broker::default();
        let mut a = broker.subscribe(Filter::all(), None);
        let mut b = broker.subscribe(Filter::all(), None);

        broker.close_all();

        assert_eq!(broker.subscription_count(), 0);
        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
    }

    #[test]
    fn test_stats() {
        let broker = Broker::default();
        let server = Uuid::new_v4();
        let _a = broker.subscribe(Filter::all(), Some(1));
        let _b = broker.subscribe(Filter::all(), Some(1));

        broker.publish(plugin_event(server, "1"));
        broker.publish(plugin_event(server, "2"));

        let stats = broker.stats();
        assert_eq!(stats.subscriptions, 2);
        assert_eq!(stats.published, 2);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped, 2);
    }
}
