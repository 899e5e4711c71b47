use std::collections::HashMap;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

pub type RelaySender = mpsc::UnboundedSender<Message>;

/// Connection registry for the fan-out relay.
///
/// Thread-safe via interior `RwLock`; wrapped in `Arc` on `AppState` and
/// shared across the application.
pub struct Relay {
    connections: RwLock<HashMap<Uuid, RelaySender>>,
}

impl Relay {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection; the returned receiver feeds the socket sink.
    pub async fn add(&self, conn_id: Uuid) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().await.insert(conn_id, tx);
        rx
    }

    pub async fn remove(&self, conn_id: Uuid) {
        self.connections.write().await.remove(&conn_id);
    }

    /// Best-effort fan-out to every connection except the sender.
    ///
    /// Closed channels are silently skipped; their connections clean
    /// themselves up when their receive loop ends. At-most-once, no
    /// ordering guarantee.
    pub async fn broadcast_except(&self, sender_id: Uuid, message: Message) {
        let conns = self.connections.read().await;
        for (id, tx) in conns.iter() {
            if *id == sender_id {
                continue;
            }
            let _ = tx.send(message.clone());
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_skips_the_sender() {
        let relay = Relay::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let mut rx_a = relay.add(a).await;
        let mut rx_b = relay.add(b).await;
        let mut rx_c = relay.add(c).await;

        relay
            .broadcast_except(a, Message::Text("hello".into()))
            .await;

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), Message::Text("hello".into()));
        assert_eq!(rx_c.try_recv().unwrap(), Message::Text("hello".into()));
    }

    #[tokio::test]
    async fn removed_connections_stop_receiving() {
        let relay = Relay::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _rx_a = relay.add(a).await;
        let mut rx_b = relay.add(b).await;

        relay.remove(b).await;
        assert_eq!(relay.connection_count().await, 1);

        relay.broadcast_except(a, Message::Text("bye".into())).await;
        // The channel is closed because its sender was dropped on remove.
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_receivers_do_not_poison_the_fanout() {
        let relay = Relay::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let _rx_a = relay.add(a).await;
        let rx_b = relay.add(b).await;
        let mut rx_c = relay.add(c).await;

        drop(rx_b);
        relay
            .broadcast_except(a, Message::Text("still here".into()))
            .await;
        assert_eq!(
            rx_c.try_recv().unwrap(),
            Message::Text("still here".into())
        );
    }
}
