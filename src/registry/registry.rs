use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use super::ConnectionHandle;

/// Concurrency-safe map from user identity to the single active connection.
///
/// All operations are atomic with respect to each other; mutations to one
/// user's slot are linearized by the map's per-key locking, and no await
/// point runs while a map guard is held. Absent identities are simply absent;
/// the API has no invalid state.
pub struct ConnectionRegistry {
    /// user_id -> the one live connection for that user
    connections: DashMap<String, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Install the handle as its user's single connection.
    ///
    /// Returns the superseded handle when one was present so the caller can
    /// close it and reclaim the socket.
    pub fn register(&self, handle: Arc<ConnectionHandle>) -> Option<Arc<ConnectionHandle>> {
        let replaced = self
            .connections
            .insert(handle.user_id.clone(), handle.clone());

        tracing::info!(
            connection_id = %handle.id,
            user_id = %handle.user_id,
            replaced = replaced.is_some(),
            "Connection registered"
        );

        replaced
    }

    /// Remove the user's entry only if `connection_id` still names the
    /// current handle. A disconnect event for a superseded handle must not
    /// evict the connection that replaced it.
    pub fn unregister(&self, user_id: &str, connection_id: Uuid) -> bool {
        let removed = self
            .connections
            .remove_if(user_id, |_, handle| handle.id == connection_id)
            .is_some();

        if removed {
            tracing::info!(
                connection_id = %connection_id,
                user_id = %user_id,
                "Connection unregistered"
            );
        } else {
            tracing::debug!(
                connection_id = %connection_id,
                user_id = %user_id,
                "Unregister skipped, handle is not current"
            );
        }

        removed
    }

    pub fn lookup(&self, user_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(user_id).map(|entry| entry.clone())
    }

    /// The currently online user set
    pub fn snapshot(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// All live handles, cloned out so callers never push while a map guard
    /// is held.
    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::ServerMessage;
    use tokio::sync::mpsc;

    fn handle_for(user_id: &str) -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::channel::<ServerMessage>(8);
        Arc::new(ConnectionHandle::new(user_id.to_string(), tx))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let handle = handle_for("alice");

        assert!(registry.register(handle.clone()).is_none());
        assert_eq!(registry.lookup("alice").unwrap().id, handle.id);
        assert!(registry.lookup("bob").is_none());
    }

    #[test]
    fn test_register_replaces_previous_handle() {
        let registry = ConnectionRegistry::new();
        let first = handle_for("alice");
        let second = handle_for("alice");

        assert!(registry.register(first.clone()).is_none());
        let replaced = registry.register(second.clone()).unwrap();

        assert_eq!(replaced.id, first.id);
        assert_eq!(registry.lookup("alice").unwrap().id, second.id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_current_handle() {
        let registry = ConnectionRegistry::new();
        let handle = handle_for("alice");
        registry.register(handle.clone());

        assert!(registry.unregister("alice", handle.id));
        assert!(registry.lookup("alice").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_superseded_handle_is_noop() {
        let registry = ConnectionRegistry::new();
        let first = handle_for("alice");
        let second = handle_for("alice");

        registry.register(first.clone());
        registry.register(second.clone());

        // Disconnect of the replaced handle must not evict the newer one
        assert!(!registry.unregister("alice", first.id));
        assert_eq!(registry.lookup("alice").unwrap().id, second.id);
    }

    #[test]
    fn test_unregister_absent_identity() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.unregister("ghost", Uuid::new_v4()));
    }

    #[test]
    fn test_snapshot_reflects_registered_users() {
        let registry = ConnectionRegistry::new();
        registry.register(handle_for("alice"));
        registry.register(handle_for("bob"));

        let mut snapshot = registry.snapshot();
        snapshot.sort();
        assert_eq!(snapshot, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_churn_leaves_at_most_one_handle() {
        use rand::Rng;

        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();

        // Many interleaved connect/disconnect cycles against one identity
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let handle = {
                        let (tx, _rx) = mpsc::channel::<ServerMessage>(1);
                        Arc::new(ConnectionHandle::new("alice".to_string(), tx))
                    };
                    registry.register(handle.clone());

                    let jitter = rand::rng().random_range(0..50);
                    if jitter > 10 {
                        tokio::task::yield_now().await;
                    }

                    registry.unregister("alice", handle.id);
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        // Whatever interleaving happened, the slot holds zero or one handle
        assert!(registry.len() <= 1);
    }
}
