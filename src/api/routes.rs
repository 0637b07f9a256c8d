use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::handlers::{get_conversation, send_message};
use super::health::{health, metrics, stats};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        // Message endpoints
        .nest(
            "/api/messages",
            Router::new()
                .route("/send/{receiver_id}", post(send_message))
                .route("/{peer_id}", get(get_conversation)),
        )
}
