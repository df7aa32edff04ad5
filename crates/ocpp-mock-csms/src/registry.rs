//! Identity → live connection lookup

use crate::connection::Connection;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use uuid::Uuid;

/// Registry of connected charge points
///
/// Holds non-owning handles: the connection task owns each [`Connection`],
/// and a lookup only succeeds while that task keeps it alive.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Weak<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its identity
    ///
    /// A second connection with the same identity replaces the first
    /// (last connect wins); the first connection is not closed.
    pub fn register(&self, connection: &Arc<Connection>) {
        let identity = connection.identity().to_string();
        if let Some(previous) = self
            .connections
            .insert(identity.clone(), Arc::downgrade(connection))
        {
            if previous.strong_count() > 0 {
                info!(
                    "Charge point {} reconnected; replacing previous connection",
                    identity
                );
            }
        }
        debug!("Registered {} ({})", identity, connection.id());
    }

    pub fn lookup(&self, identity: &str) -> Option<Arc<Connection>> {
        self.connections
            .get(identity)
            .and_then(|entry| entry.value().upgrade())
    }

    /// Remove the entry for `identity` regardless of which connection holds it
    pub fn unregister(&self, identity: &str) {
        self.connections.remove(identity);
    }

    /// Remove the entry only if it still points at `connection_id`
    ///
    /// Used on close so that an old connection going away does not evict a
    /// newer connection that registered under the same identity.
    pub fn unregister_connection(&self, identity: &str, connection_id: Uuid) -> bool {
        self.connections
            .remove_if(identity, |_, handle| match handle.upgrade() {
                Some(connection) => connection.id() == connection_id,
                None => true,
            })
            .is_some()
    }

    /// Identities with a live connection
    pub fn list_identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self
            .connections
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .map(|entry| entry.key().clone())
            .collect();
        identities.sort();
        identities
    }

    /// Number of identities with a live connection
    pub fn len(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
