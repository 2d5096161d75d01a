//! Game server directory
//!
//! The known game servers and where their consoles live, as loaded from
//! configuration.

use std::collections::HashMap;
use uuid::Uuid;

use crate::config::GameServerConfig;
use crate::console::ConsoleTarget;

#[derive(Debug, Clone, Default)]
pub struct ServerDirectory {
    servers: HashMap<Uuid, GameServerConfig>,
}

impl ServerDirectory {
    pub fn new(servers: impl IntoIterator<Item = GameServerConfig>) -> Self {
        Self {
            servers: servers.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&GameServerConfig> {
        self.servers.get(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.servers.contains_key(&id)
    }

    /// Console endpoint for a server
    pub fn target(&self, id: Uuid) -> Option<ConsoleTarget> {
        self.get(id)
            .map(|s| ConsoleTarget::new(s.address.clone(), s.port, s.credential.clone()))
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
