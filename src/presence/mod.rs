//! Presence broadcasting.
//!
//! Every snapshot is recomputed from the registry at push time and filtered
//! per recipient, so a user never sees itself in its own online-peers list.
//! Announcements run after the registry mutation that triggered them, which
//! gives each recipient a snapshot at least as fresh as that mutation.

use std::sync::Arc;

use crate::metrics;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::websocket::ServerMessage;

pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// The online set as seen by `user_id`, excluding the recipient itself
    pub fn snapshot_for(&self, user_id: &str) -> Vec<String> {
        self.registry
            .snapshot()
            .into_iter()
            .filter(|online| online != user_id)
            .collect()
    }

    /// Push the current filtered snapshot to one connection.
    ///
    /// Also serves the on-demand `getOnlineUsers` request: an idempotent read
    /// with no side effects.
    pub async fn send_snapshot(&self, handle: &ConnectionHandle) {
        let users = self.snapshot_for(&handle.user_id);
        if handle.send(ServerMessage::online_users(users)).await.is_err() {
            tracing::debug!(
                connection_id = %handle.id,
                user_id = %handle.user_id,
                "Presence snapshot push failed, connection closing"
            );
        }
    }

    /// Announce a newly registered connection: the joiner gets its snapshot,
    /// every other connection gets an updated one.
    #[tracing::instrument(
        name = "presence.announce_join",
        skip(self, joined),
        fields(user_id = %joined.user_id)
    )]
    pub async fn announce_join(&self, joined: &Arc<ConnectionHandle>) {
        self.send_snapshot(joined).await;
        self.notify_peers(&joined.user_id).await;
    }

    /// Announce a departure to every remaining connection.
    #[tracing::instrument(name = "presence.announce_leave", skip(self))]
    pub async fn announce_leave(&self, left_user_id: &str) {
        self.notify_peers(left_user_id).await;
    }

    /// Push recipient-exclusive snapshots to every connection other than the
    /// one belonging to `about_user`. Handles are cloned out of the registry
    /// before any send, so no push happens under a map guard.
    async fn notify_peers(&self, about_user: &str) {
        let connections = self.registry.all_connections();
        let mut notified = 0usize;

        for conn in connections {
            if conn.user_id == about_user {
                continue;
            }

            let users = self.snapshot_for(&conn.user_id);
            if conn.send(ServerMessage::online_users(users)).await.is_ok() {
                notified += 1;
            } else {
                tracing::debug!(
                    connection_id = %conn.id,
                    user_id = %conn.user_id,
                    "Presence update push failed, connection closing"
                );
            }
        }

        metrics::PRESENCE_BROADCASTS_TOTAL.inc();

        tracing::debug!(
            about_user = %about_user,
            notified = notified,
            "Presence update broadcast"
        );
    }
}
