use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::websocket::ServerMessage;

/// Handle for a single WebSocket connection.
///
/// The registry owns at most one handle per user; the socket task and the
/// routing paths share it via `Arc`. All pushes go through `send`, and
/// `close`/`closed` carry the eviction signal when a newer connection for the
/// same user supersedes this one.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: String,
    pub sender: mpsc::Sender<ServerMessage>,
    pub connected_at: DateTime<Utc>,
    evicted: Notify,
}

impl ConnectionHandle {
    pub fn new(user_id: String, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            sender,
            connected_at: Utc::now(),
            evicted: Notify::new(),
        }
    }

    pub async fn send(
        &self,
        message: ServerMessage,
    ) -> Result<(), mpsc::error::SendError<ServerMessage>> {
        self.sender.send(message).await
    }

    /// Signal the socket task that this handle has been superseded.
    ///
    /// `notify_one` stores a permit, so the signal is not lost if the socket
    /// task has not reached its `closed().await` yet.
    pub fn close(&self) {
        self.evicted.notify_one();
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        self.evicted.notified().await;
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}
