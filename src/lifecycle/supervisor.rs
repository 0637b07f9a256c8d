use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics;
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::websocket::ServerMessage;

use super::machine::{transition, Effect, SlotEvent, SlotState};

/// Owns connect/disconnect sequencing for every identity.
///
/// The registry's atomic register/unregister linearize concurrent events on
/// one identity; the supervisor derives the prior slot state from their
/// outcome, runs it through the state machine, and applies the effects.
pub struct LifecycleSupervisor {
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceBroadcaster>,
}

impl LifecycleSupervisor {
    pub fn new(registry: Arc<ConnectionRegistry>, presence: Arc<PresenceBroadcaster>) -> Self {
        Self { registry, presence }
    }

    /// Admit a connection for `user_id`, evicting any prior one.
    #[tracing::instrument(name = "lifecycle.connect", skip(self, sender))]
    pub async fn connect(
        &self,
        user_id: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(user_id, sender));
        let replaced = self.registry.register(handle.clone());

        let prior = replaced
            .as_ref()
            .map(|old| SlotState::Active(old.id))
            .unwrap_or(SlotState::Absent);
        let (_, effects) = transition(prior, SlotEvent::Connect(handle.id));

        for effect in effects {
            match effect {
                Effect::CloseSuperseded(old_id) => {
                    if let Some(old) = replaced.as_ref().filter(|old| old.id == old_id) {
                        tracing::info!(
                            superseded_id = %old.id,
                            user_id = %old.user_id,
                            "Closing superseded connection"
                        );
                        metrics::CONNECTIONS_SUPERSEDED_TOTAL.inc();
                        old.close();
                    }
                }
                Effect::AnnounceJoin => self.presence.announce_join(&handle).await,
                Effect::AnnounceLeave => {
                    self.presence.announce_leave(&handle.user_id).await
                }
            }
        }

        handle
    }

    /// Retire a connection. A disconnect carrying a superseded handle's id is
    /// a no-op; the registry guard keeps the newer connection in place.
    #[tracing::instrument(name = "lifecycle.disconnect", skip(self))]
    pub async fn disconnect(&self, user_id: &str, connection_id: Uuid) {
        if !self.registry.unregister(user_id, connection_id) {
            // Raced with a newer registration for this identity
            tracing::debug!("Ignoring disconnect for superseded handle");
            return;
        }

        let (_, effects) = transition(
            SlotState::Active(connection_id),
            SlotEvent::Disconnect(connection_id),
        );

        for effect in effects {
            if let Effect::AnnounceLeave = effect {
                self.presence.announce_leave(user_id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn supervisor() -> (Arc<ConnectionRegistry>, LifecycleSupervisor) {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = Arc::new(PresenceBroadcaster::new(registry.clone()));
        (registry.clone(), LifecycleSupervisor::new(registry, presence))
    }

    #[tokio::test]
    async fn test_connect_registers_and_delivers_snapshot() {
        let (registry, supervisor) = supervisor();

        let (tx, mut rx) = mpsc::channel::<ServerMessage>(8);
        let handle = supervisor.connect("alice".to_string(), tx).await;

        assert_eq!(registry.lookup("alice").unwrap().id, handle.id);

        // The joiner receives its (empty) filtered snapshot
        match rx.recv().await.unwrap() {
            ServerMessage::OnlineUsers { users } => assert!(users.is_empty()),
            other => panic!("expected onlineUsers, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconnect_closes_first_handle() {
        let (registry, supervisor) = supervisor();

        let (tx1, _rx1) = mpsc::channel::<ServerMessage>(8);
        let first = supervisor.connect("alice".to_string(), tx1).await;

        let (tx2, _rx2) = mpsc::channel::<ServerMessage>(8);
        let second = supervisor.connect("alice".to_string(), tx2).await;

        assert_eq!(registry.lookup("alice").unwrap().id, second.id);
        assert_eq!(registry.len(), 1);

        // The eviction signal on the first handle must fire
        tokio::time::timeout(Duration::from_secs(1), first.closed())
            .await
            .expect("superseded handle should be closed");
    }

    #[tokio::test]
    async fn test_stale_disconnect_keeps_current_connection() {
        let (registry, supervisor) = supervisor();

        let (tx1, _rx1) = mpsc::channel::<ServerMessage>(8);
        let first = supervisor.connect("alice".to_string(), tx1).await;

        let (tx2, _rx2) = mpsc::channel::<ServerMessage>(8);
        let second = supervisor.connect("alice".to_string(), tx2).await;

        // The superseded socket task reports its disconnect late
        supervisor.disconnect("alice", first.id).await;

        assert_eq!(registry.lookup("alice").unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_disconnect_announces_leave_to_peers() {
        let (_registry, supervisor) = supervisor();

        let (tx_a, mut rx_a) = mpsc::channel::<ServerMessage>(8);
        supervisor.connect("alice".to_string(), tx_a).await;
        // Drain alice's own join snapshot
        rx_a.recv().await.unwrap();

        let (tx_b, _rx_b) = mpsc::channel::<ServerMessage>(8);
        let bob = supervisor.connect("bob".to_string(), tx_b).await;

        // Alice sees bob join...
        match rx_a.recv().await.unwrap() {
            ServerMessage::OnlineUsers { users } => assert_eq!(users, vec!["bob".to_string()]),
            other => panic!("expected onlineUsers, got {:?}", other),
        }

        supervisor.disconnect("bob", bob.id).await;

        // ...and sees him leave
        match rx_a.recv().await.unwrap() {
            ServerMessage::OnlineUsers { users } => assert!(users.is_empty()),
            other => panic!("expected onlineUsers, got {:?}", other),
        }
    }
}
