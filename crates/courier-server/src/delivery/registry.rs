//! The set of live connections held by one identity.

use std::sync::Arc;

use courier_core::ConnectionId;

use super::connection::Connection;

/// Connections of one identity, in the order they were opened.
///
/// A user typically has a handful of devices, so a vector beats a map here.
#[derive(Default)]
pub struct ConnectionSet {
    connections: Vec<Arc<Connection>>,
}

impl ConnectionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. A connection already present is replaced in place.
    pub fn insert(&mut self, connection: Arc<Connection>) {
        if let Some(slot) = self.connections.iter_mut().find(|c| c.id == connection.id) {
            *slot = connection;
        } else {
            self.connections.push(connection);
        }
    }

    /// Remove a connection by ID.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let index = self.connections.iter().position(|c| &c.id == id)?;
        Some(self.connections.remove(index))
    }

    /// Look up a connection by ID.
    pub fn get(&self, id: &ConnectionId) -> Option<&Arc<Connection>> {
        self.connections.iter().find(|c| &c.id == id)
    }

    /// Number of connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Iterate over the connections.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.connections.iter()
    }

    /// Clone the connection handles out of the set.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.clone()
    }
}
