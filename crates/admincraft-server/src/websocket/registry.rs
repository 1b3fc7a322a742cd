//! Session registry: live connections indexed by connection ID.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

/// Tracks every live session for broadcast and cleanup.
pub struct SessionRegistry {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection. Returns `false` if the ID is already present.
    pub async fn add(&self, connection: Arc<ClientConnection>) -> bool {
        let mut conns = self.connections.write().await;
        if conns.contains_key(&connection.id) {
            return false;
        }
        let _ = conns.insert(connection.id.clone(), connection);
        true
    }

    /// Remove a connection by ID. Returns `false` if it was not registered.
    pub async fn remove(&self, connection_id: &str) -> bool {
        self.connections.write().await.remove(connection_id).is_some()
    }

    /// Send `payload` to every connection in the `Streaming` state.
    ///
    /// Recipients are snapshotted before sending, so sessions added or
    /// removed mid-broadcast neither block it nor invalidate it. Returns the
    /// number of connections the payload was queued for.
    pub async fn broadcast(&self, payload: impl Into<String>) -> usize {
        let payload = Arc::new(payload.into());
        let recipients: Vec<Arc<ClientConnection>> = {
            let conns = self.connections.read().await;
            conns.values().filter(|c| c.is_streaming()).cloned().collect()
        };

        let mut delivered = 0;
        for conn in &recipients {
            if conn.send(Arc::clone(&payload)) {
                delivered += 1;
            } else {
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(conn_id = %conn.id, "outbound queue full, dropping broadcast");
            }
        }
        debug!(recipients = recipients.len(), delivered, "broadcast");
        delivered
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of connections currently streaming.
    pub async fn streaming_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.is_streaming())
            .count()
    }

    /// Look up a connection.
    pub async fn get(&self, connection_id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(connection_id).cloned()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use admincraft_core::Identity;
    use tokio::sync::mpsc;

    use super::*;
    use crate::websocket::connection::SessionState;

    fn streaming(id: &str, capacity: usize) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(ClientConnection::new(id.into(), Identity::new(id), tx));
        conn.set_state(SessionState::Streaming);
        (conn, rx)
    }

    #[tokio::test]
    async fn add_and_remove() {
        let registry = SessionRegistry::new();
        let (c1, _rx1) = streaming("c1", 4);
        assert!(registry.add(c1).await);
        assert_eq!(registry.connection_count().await, 1);
        assert!(registry.get("c1").await.is_some());

        assert!(registry.remove("c1").await);
        assert!(!registry.remove("c1").await);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_add_refused() {
        let registry = SessionRegistry::new();
        let (c1, _rx1) = streaming("c1", 4);
        assert!(registry.add(c1.clone()).await);
        assert!(!registry.add(c1).await);
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_each_streaming_session_once() {
        let registry = SessionRegistry::new();
        let (c1, mut rx1) = streaming("c1", 4);
        let (c2, mut rx2) = streaming("c2", 4);
        let _ = registry.add(c1).await;
        let _ = registry.add(c2).await;

        assert_eq!(registry.broadcast("There are 0 of a max of 20 players online").await, 2);
        assert_eq!(*rx1.recv().await.unwrap(), "There are 0 of a max of 20 players online");
        assert_eq!(*rx2.recv().await.unwrap(), "There are 0 of a max of 20 players online");
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_shares_one_allocation() {
        let registry = SessionRegistry::new();
        let (c1, mut rx1) = streaming("c1", 4);
        let (c2, mut rx2) = streaming("c2", 4);
        let _ = registry.add(c1).await;
        let _ = registry.add(c2).await;

        let _ = registry.broadcast("shared").await;
        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn broadcast_skips_non_streaming() {
        let registry = SessionRegistry::new();
        let (c1, mut rx1) = streaming("c1", 4);
        let (c2, mut rx2) = streaming("c2", 4);
        c2.set_state(SessionState::Closing);
        let _ = registry.add(c1).await;
        let _ = registry.add(c2).await;

        assert_eq!(registry.streaming_count().await, 1);
        assert_eq!(registry.broadcast("hi").await, 1);
        assert_eq!(*rx1.recv().await.unwrap(), "hi");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_does_not_block_others() {
        let registry = SessionRegistry::new();
        let (slow, _slow_rx) = streaming("slow", 1);
        let (fast, mut fast_rx) = streaming("fast", 8);
        let _ = registry.add(slow.clone()).await;
        let _ = registry.add(fast).await;

        let _ = registry.broadcast("one").await;
        let delivered = registry.broadcast("two").await;
        assert_eq!(delivered, 1);
        assert_eq!(slow.drop_count(), 1);
        assert_eq!(*fast_rx.recv().await.unwrap(), "one");
        assert_eq!(*fast_rx.recv().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn broadcast_tolerates_concurrent_removal() {
        let registry = Arc::new(SessionRegistry::new());
        let mut receivers = Vec::new();
        for i in 0..16 {
            let (conn, rx) = streaming(&format!("c{i}"), 64);
            let _ = registry.add(conn).await;
            receivers.push(rx);
        }

        let remover = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for i in 0..16 {
                    let _ = registry.remove(&format!("c{i}")).await;
                }
            })
        };
        for _ in 0..8 {
            let _ = registry.broadcast("tick").await;
        }
        remover.await.unwrap();
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn empty_registry_broadcast() {
        let registry = SessionRegistry::default();
        assert_eq!(registry.broadcast("nobody").await, 0);
    }
}
