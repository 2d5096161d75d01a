//! Subscription filters
//!
//! A `Filter` declares which event types and which game servers a
//! subscriber wants. An empty set on either axis means "everything".

use std::collections::HashSet;
use uuid::Uuid;

use super::types::{Event, EventType};

/// Predicate over (event type, originating server)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    types: HashSet<EventType>,
    servers: HashSet<Uuid>,
}

impl Filter {
    /// Filter that accepts every event
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter from explicit type and server sets
    pub fn new(
        types: impl IntoIterator<Item = EventType>,
        servers: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        Self {
            types: types.into_iter().collect(),
            servers: servers.into_iter().collect(),
        }
    }

    /// Builder method: accept an event type
    pub fn with_type(mut self, event_type: EventType) -> Self {
        self.types.insert(event_type);
        self
    }

    /// Builder method: accept a server
    pub fn with_server(mut self, server_id: Uuid) -> Self {
        self.servers.insert(server_id);
        self
    }

    pub fn types(&self) -> &HashSet<EventType> {
        &self.types
    }

    pub fn servers(&self) -> &HashSet<Uuid> {
        &self.servers
    }

    /// Check a (type, server) pair against the filter
    ///
    /// Events without a server match any server set.
    pub fn accepts(&self, event_type: EventType, server_id: Option<Uuid>) -> bool {
        let type_ok = self.types.is_empty() || self.types.contains(&event_type);
        let server_ok = match server_id {
            None => true,
            Some(id) => self.servers.is_empty() || self.servers.contains(&id),
        };
        type_ok && server_ok
    }

    /// Check an event against the filter
    pub fn matches(&self, event: &Event) -> bool {
        self.accepts(event.event_type(), event.server_id)
    }
}
