//! Process-wide registry of open gateway connections.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use roster_core::ids::ConnectionId;
use tokio::sync::RwLock;
use tracing::debug;

use super::connection::{ClientConnection, SendOutcome};

/// Registry invariant violations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// `register` was called twice for the same connection identity.
    ///
    /// This cannot happen in correct operation; raising it signals a bug in
    /// the session lifecycle, not a recoverable runtime condition.
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),
}

/// The set of all open, authorized connections.
///
/// Keys are UUIDv7-based ids, so iteration over the `BTreeMap` enumerates
/// connections in registration order. Snapshots are taken under the read
/// lock and are safe to use while other tasks register or unregister.
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<ConnectionId, Arc<ClientConnection>>>,
    /// Atomic count so `/health` never takes the lock.
    active_count: AtomicUsize,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Add an open connection.
    pub async fn register(&self, connection: Arc<ClientConnection>) -> Result<(), RegistryError> {
        let mut conns = self.connections.write().await;
        if conns.contains_key(&connection.id) {
            return Err(RegistryError::AlreadyRegistered(connection.id.clone()));
        }
        let id = connection.id.clone();
        let _ = conns.insert(id.clone(), connection);
        let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
        debug!(conn_id = %id, "connection registered");
        Ok(())
    }

    /// Remove a connection. Idempotent: removing an absent id is a no-op.
    pub async fn unregister(&self, id: &ConnectionId) {
        let mut conns = self.connections.write().await;
        if conns.remove(id).is_some() {
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
            debug!(conn_id = %id, "connection unregistered");
        }
    }

    /// Snapshot of open connections in registration order.
    pub async fn active(&self) -> Vec<Arc<ClientConnection>> {
        let conns = self.connections.read().await;
        conns.values().cloned().collect()
    }

    /// Whether a connection is currently registered.
    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(id)
    }

    /// Attempt delivery to one registered connection.
    ///
    /// An unknown or closed connection yields [`SendOutcome::Closed`]; it
    /// never raises — the caller treats it as "not delivered, do not retry
    /// against this connection".
    pub async fn send(&self, id: &ConnectionId, message: Arc<String>) -> SendOutcome {
        let conns = self.connections.read().await;
        match conns.get(id) {
            Some(conn) => conn.send(message),
            None => SendOutcome::Closed,
        }
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
