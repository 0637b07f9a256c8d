use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::{parse_cookie, HandshakeMeta, ResolvedIdentity, SESSION_COOKIE};
use crate::metrics;
use crate::registry::ConnectionHandle;
use crate::server::AppState;

use super::message::{ClientMessage, ServerMessage};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(
        has_query_token = query.token.is_some(),
        has_claimed_identity = query.user_id.is_some()
    )
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let meta = handshake_meta(&query, &headers);

    let identity = match state.identity_resolver.resolve(&meta) {
        Ok(identity) => identity,
        Err(reason) => {
            tracing::warn!(reason = %reason, "WebSocket handshake rejected");
            return (StatusCode::UNAUTHORIZED, reason.to_string()).into_response();
        }
    };

    tracing::info!(
        user_id = %identity.user_id,
        verified = identity.verified,
        "WebSocket upgrade requested"
    );

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// Collect credential material from the query string and headers.
fn handshake_meta(query: &WsQuery, headers: &HeaderMap) -> HandshakeMeta {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string());

    let cookie_token = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|cookies| parse_cookie(cookies, SESSION_COOKIE));

    HandshakeMeta {
        query_token: query.token.clone().or(bearer),
        cookie_token,
        claimed_user_id: query.user_id.clone(),
    }
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, identity),
    fields(user_id = %identity.user_id)
)]
async fn handle_socket(socket: WebSocket, state: AppState, identity: ResolvedIdentity) {
    let user_id = identity.user_id;
    let connection_start = std::time::Instant::now();

    // Channel for pushing events to this connection
    let (tx, mut rx) =
        mpsc::channel::<ServerMessage>(state.settings.websocket.channel_buffer);

    // Registering evicts any prior connection for this user and runs the
    // join announcement
    let handle = state.supervisor.connect(user_id.clone(), tx).await;
    let connection_id = handle.id;

    metrics::CONNECTIONS_OPENED_TOTAL.inc();
    metrics::CONNECTIONS_ACTIVE.set(state.registry.len() as i64);

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        "WebSocket connection established"
    );

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Task for receiving messages from WebSocket
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &handle_clone).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Run until the transport drops, the peer closes, or a newer connection
    // for this user evicts us
    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
            send_task.abort();
        }
        _ = handle.closed() => {
            tracing::info!(
                connection_id = %connection_id,
                user_id = %user_id,
                "Connection superseded by a newer handle"
            );
            send_task.abort();
            recv_task.abort();
        }
    }

    // The stale-handle guard in the registry makes this a no-op when a newer
    // connection already replaced us
    state.supervisor.disconnect(&user_id, connection_id).await;

    metrics::CONNECTIONS_CLOSED_TOTAL.inc();
    metrics::CONNECTIONS_ACTIVE.set(state.registry.len() as i64);

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(
    msg: Message,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) -> bool {
    match msg {
        Message::Text(text) => {
            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client message");
                    let _ = handle
                        .send(ServerMessage::error("INVALID_MESSAGE", e.to_string()))
                        .await;
                    return true;
                }
            };

            handle_client_message(client_msg, state, handle).await;
            true
        }
        Message::Binary(_) => {
            let _ = handle
                .send(ServerMessage::error(
                    "UNSUPPORTED_FORMAT",
                    "Binary messages are not supported",
                ))
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            // Axum answers pings itself; nothing to do
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

/// Handle a parsed client message
#[tracing::instrument(
    name = "ws.message",
    skip(state, handle),
    fields(
        connection_id = %handle.id,
        user_id = %handle.user_id,
        message_type = ?msg
    )
)]
async fn handle_client_message(
    msg: ClientMessage,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) {
    match msg {
        ClientMessage::GetOnlineUsers => {
            state.presence.send_snapshot(handle).await;
        }
        ClientMessage::Ping => {
            let _ = handle.send(ServerMessage::Pong).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn query(token: Option<&str>, user_id: Option<&str>) -> WsQuery {
        WsQuery {
            token: token.map(|s| s.to_string()),
            user_id: user_id.map(|s| s.to_string()),
        }
    }

    #[test]
    fn test_handshake_meta_prefers_query_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer header-token"),
        );

        let meta = handshake_meta(&query(Some("query-token"), None), &headers);
        assert_eq!(meta.query_token.as_deref(), Some("query-token"));
    }

    #[test]
    fn test_handshake_meta_falls_back_to_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer header-token"),
        );

        let meta = handshake_meta(&query(None, None), &headers);
        assert_eq!(meta.query_token.as_deref(), Some("header-token"));
    }

    #[test]
    fn test_handshake_meta_reads_session_cookie_and_claimed_identity() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("jwt=cookie-token; theme=dark"),
        );

        let meta = handshake_meta(&query(None, Some("alice")), &headers);
        assert_eq!(meta.cookie_token.as_deref(), Some("cookie-token"));
        assert_eq!(meta.claimed_user_id.as_deref(), Some("alice"));
    }
}
