//! Event distribution core
//!
//! ## Architecture
//!
//! - **Event**: immutable, typed record of something that happened
//! - **Filter**: a subscriber's interest in event types and game servers
//! - **Broker**: registry of subscriptions; fans published events out to
//!   every matching subscriber queue without ever blocking the publisher
//!
//! ## Example
//!
//! ```rust
//! use beacon::events::{Broker, BrokerConfig, Event, EventType, Filter};
//! use uuid::Uuid;
//!
//! let broker = Broker::new(BrokerConfig::default());
//! let server = Uuid::new_v4();
//!
//! let mut sub = broker.subscribe(Filter::all().with_type(EventType::ConsoleOutput), None);
//! broker.publish(Event::console_output(server, None, "Server started"));
//!
//! assert!(sub.try_recv().is_some());
//! ```

mod broker;
mod filter;
mod types;

pub use broker::{
    Broker, BrokerConfig, BrokerStats, DropCounter, Subscription, SubscriptionId, MAX_QUEUE_CAPACITY,
};
pub use filter::Filter;
pub use types::{Event, EventPayload, EventType, LogLevel, PluginLogRecord};
