use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::metrics::MessageMetrics;
use crate::registry::ConnectionRegistry;
use crate::websocket::ServerMessage;

use super::MessageRecord;

/// What happened to a single routing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteOutcome {
    /// Pushed to the receiver's live connection
    Delivered,
    /// Receiver has no connection; history retrieval covers it on next connect
    ReceiverOffline,
    /// The receiver's handle closed during the push; persistence is
    /// authoritative, no retry
    PushFailed,
}

/// Counters for the fan-out path
#[derive(Debug, Default)]
pub struct RouterStats {
    pub routed: AtomicU64,
    pub delivered: AtomicU64,
    pub receiver_offline: AtomicU64,
    pub push_failed: AtomicU64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            routed: self.routed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            receiver_offline: self.receiver_offline.load(Ordering::Relaxed),
            push_failed: self.push_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterStatsSnapshot {
    pub routed: u64,
    pub delivered: u64,
    pub receiver_offline: u64,
    pub push_failed: u64,
}

/// Delivers persisted message records to the receiver's live connection.
///
/// One push attempt per record: the store-assigned id names the delivery, and
/// a single attempt per recipient connection instance keeps it at-most-once.
/// The sender is never targeted; its confirmation is the synchronous
/// create-message response.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    stats: RouterStats,
}

impl MessageRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: RouterStats::default(),
        }
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    #[tracing::instrument(
        name = "relay.route",
        skip(self, record),
        fields(
            message_id = %record.id,
            sender_id = %record.sender_id,
            receiver_id = %record.receiver_id
        )
    )]
    pub async fn route(&self, record: &MessageRecord) -> RouteOutcome {
        self.stats.routed.fetch_add(1, Ordering::Relaxed);
        MessageMetrics::record_routed();

        // A self-addressed record would make the one push a push to the
        // sender; the create-message response already covers it.
        if record.receiver_id == record.sender_id {
            self.stats.receiver_offline.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Self-addressed message, not routed");
            return RouteOutcome::ReceiverOffline;
        }

        let Some(receiver) = self.registry.lookup(&record.receiver_id) else {
            self.stats.receiver_offline.fetch_add(1, Ordering::Relaxed);
            MessageMetrics::record_receiver_offline();
            tracing::debug!("Receiver offline, deferring to history retrieval");
            return RouteOutcome::ReceiverOffline;
        };

        match receiver.send(ServerMessage::new_message(record.clone())).await {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                MessageMetrics::record_delivered();
                tracing::debug!(connection_id = %receiver.id, "Message delivered");
                RouteOutcome::Delivered
            }
            Err(_) => {
                // Disconnect won the race against this push
                self.stats.push_failed.fetch_add(1, Ordering::Relaxed);
                MessageMetrics::record_push_failed();
                tracing::warn!(
                    connection_id = %receiver.id,
                    "Receiver connection closed during push, delivery skipped"
                );
                RouteOutcome::PushFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionHandle;
    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn record(sender: &str, receiver: &str, text: &str) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            text: Some(text.to_string()),
            media_url: None,
            created_at: Utc::now(),
        }
    }

    fn connect(
        registry: &ConnectionRegistry,
        user_id: &str,
    ) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel::<ServerMessage>(8);
        registry.register(Arc::new(ConnectionHandle::new(user_id.to_string(), tx)));
        rx
    }

    #[tokio::test]
    async fn test_route_delivers_to_receiver_only() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(registry.clone());

        let mut alice_rx = connect(&registry, "alice");
        let mut bob_rx = connect(&registry, "bob");

        let outcome = router.route(&record("alice", "bob", "hi")).await;
        assert_eq!(outcome, RouteOutcome::Delivered);

        match bob_rx.recv().await.unwrap() {
            ServerMessage::NewMessage { message } => {
                assert_eq!(message.text.as_deref(), Some("hi"));
                assert_eq!(message.sender_id, "alice");
            }
            other => panic!("expected newMessage, got {:?}", other),
        }

        // Exactly one push to the receiver, none to the sender
        assert!(bob_rx.try_recv().is_err());
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_route_offline_receiver_is_silent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(registry.clone());

        let mut alice_rx = connect(&registry, "alice");

        let outcome = router.route(&record("alice", "bob", "hi")).await;
        assert_eq!(outcome, RouteOutcome::ReceiverOffline);
        assert!(alice_rx.try_recv().is_err());

        let stats = router.stats();
        assert_eq!(stats.routed, 1);
        assert_eq!(stats.receiver_offline, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn test_route_push_failure_is_swallowed() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(registry.clone());

        // Receiver registered but its socket side is gone
        let (tx, rx) = mpsc::channel::<ServerMessage>(1);
        registry.register(Arc::new(ConnectionHandle::new("bob".to_string(), tx)));
        drop(rx);

        let outcome = router.route(&record("alice", "bob", "hi")).await;
        assert_eq!(outcome, RouteOutcome::PushFailed);
        assert_eq!(router.stats().push_failed, 1);
    }

    #[tokio::test]
    async fn test_self_addressed_record_not_pushed() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(registry.clone());

        let mut alice_rx = connect(&registry, "alice");

        let outcome = router.route(&record("alice", "alice", "note to self")).await;
        assert_eq!(outcome, RouteOutcome::ReceiverOffline);
        assert!(alice_rx.try_recv().is_err());
    }
}
