use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::WebSocketConfig;
use crate::registry::ConnectionRegistry;
use crate::websocket::ServerMessage;

/// Timeout for individual heartbeat send operations
const HEARTBEAT_SEND_TIMEOUT_MS: u64 = 5000;

/// Transport-layer keep-alive.
///
/// Pushes a heartbeat frame to every live connection on an interval so
/// intermediaries keep the socket open and dead peers surface as transport
/// errors. The relay core itself owns no timeouts; silent peer loss is
/// detected by the transport and arrives as a disconnect.
pub struct HeartbeatTask {
    config: WebSocketConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        registry: Arc<ConnectionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let interval = Duration::from_secs(self.config.heartbeat_interval);
        let mut timer = tokio::time::interval(interval);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.send_heartbeats().await;
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    async fn send_heartbeats(&self) {
        let connections = self.registry.all_connections();
        if connections.is_empty() {
            return;
        }

        let send_timeout = Duration::from_millis(HEARTBEAT_SEND_TIMEOUT_MS);
        let mut sent = 0usize;
        let mut failed = 0usize;

        for handle in connections {
            match timeout(send_timeout, handle.send(ServerMessage::Heartbeat)).await {
                Ok(Ok(())) => sent += 1,
                Ok(Err(_)) => {
                    failed += 1;
                    tracing::debug!(
                        connection_id = %handle.id,
                        "Failed to send heartbeat, connection may be dead"
                    );
                }
                Err(_) => {
                    failed += 1;
                    tracing::debug!(
                        connection_id = %handle.id,
                        timeout_ms = HEARTBEAT_SEND_TIMEOUT_MS,
                        "Heartbeat send timed out"
                    );
                }
            }
        }

        tracing::debug!(sent = sent, failed = failed, "Heartbeat round completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionHandle;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_heartbeat_task_shutdown() {
        let config = WebSocketConfig::default();
        let registry = Arc::new(ConnectionRegistry::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = HeartbeatTask::new(config, registry, shutdown_rx);

        let handle = tokio::spawn(async move {
            task.run().await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn test_heartbeat_reaches_connections() {
        let config = WebSocketConfig {
            heartbeat_interval: 1,
            ..Default::default()
        };
        let registry = Arc::new(ConnectionRegistry::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let (tx, mut rx) = mpsc::channel::<ServerMessage>(8);
        registry.register(Arc::new(ConnectionHandle::new("alice".to_string(), tx)));

        let task = HeartbeatTask::new(config, registry, shutdown_rx);
        let task_handle = tokio::spawn(async move {
            task.run().await;
        });

        let msg = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("Should receive heartbeat")
            .expect("Channel should not be closed");

        assert!(matches!(msg, ServerMessage::Heartbeat));

        shutdown_tx.send(()).unwrap();
        let _ = task_handle.await;
    }
}
