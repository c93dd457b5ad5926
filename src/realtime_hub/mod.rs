//! RealtimeHub - Fan-out of shared state to every connected client
//!
//! ## Responsibilities
//!
//! - WebSocket connection registry
//! - Broadcasting `buckets_update` to all clients
//!
//! Each client has a bounded queue. A client that stops reading loses
//! broadcasts rather than growing the queue; the next snapshot supersedes them.
//!
//! Frame messages never go through the hub; each streaming session writes its
//! own frames. The hub only carries text events that every client must see.

use crate::protocol::ServerEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Broadcasts queued per client before new ones are dropped
pub const CLIENT_QUEUE_CAPACITY: usize = 16;

/// Client connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::Sender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client
    pub async fn register(&self) -> (Uuid, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, ClientConnection { id, tx });
        }
        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Client connected");
        (id, rx)
    }

    /// Unregister a client
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Client disconnected");
        }
    }

    /// Broadcast an event to all clients
    pub async fn broadcast(&self, event: &ServerEvent) {
        let text = event.to_text();
        let connections = self.connections.read().await;
        tracing::debug!(client_count = connections.len(), "Broadcasting event");

        for conn in connections.values() {
            match conn.tx.try_send(text.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection_id = %conn.id, "Client queue full, broadcast dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(connection_id = %conn.id, "Client gone, broadcast dropped");
                }
            }
        }
    }

    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_all() {
        let hub = RealtimeHub::new();
        let (_a, mut rx_a) = hub.register().await;
        let (_b, mut rx_b) = hub.register().await;
        assert_eq!(hub.connection_count(), 2);

        hub.broadcast(&ServerEvent::info("hello")).await;
        assert!(rx_a.recv().await.unwrap().contains("hello"));
        assert!(rx_b.recv().await.unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = RealtimeHub::new();
        let (a, mut rx_a) = hub.register().await;
        let (b, mut rx_b) = hub.register().await;

        hub.unregister(&b).await;
        hub.unregister(&b).await;
        assert_eq!(hub.connection_count(), 1);

        hub.broadcast(&ServerEvent::Started).await;
        assert_eq!(rx_a.recv().await.unwrap(), "started");
        assert!(rx_b.recv().await.is_none());
        hub.unregister(&a).await;
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_stalled_client_queue_is_bounded() {
        let hub = RealtimeHub::new();
        let (_stalled, mut rx_stalled) = hub.register().await;
        let (_live, mut rx_live) = hub.register().await;

        for i in 0..CLIENT_QUEUE_CAPACITY + 10 {
            hub.broadcast(&ServerEvent::info(format!("update {i}"))).await;
            assert!(rx_live.recv().await.unwrap().contains(&format!("update {i}")));
        }

        let mut queued = 0;
        while rx_stalled.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, CLIENT_QUEUE_CAPACITY);

        // drained client receives again
        hub.broadcast(&ServerEvent::Stopped).await;
        assert_eq!(rx_stalled.recv().await.unwrap(), "stopped");
    }
}
