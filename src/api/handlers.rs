//! Message endpoints.
//!
//! These are the REST surface around the relay core: create-then-route for
//! sending, and conversation history for catch-up. Authentication here is
//! strict bearer/cookie JWT; the lenient claimed-identity path exists only on
//! the WebSocket handshake, which never authorizes writes.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::{parse_cookie, Claims, SESSION_COOKIE};
use crate::error::{AppError, Result};
use crate::relay::{MessageRecord, NewMessage, RouteOutcome};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub text: Option<String>,
    pub media_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message: MessageRecord,
    /// What the real-time channel did with the record; persistence succeeded
    /// either way
    pub delivery: RouteOutcome,
}

/// Verified-token authentication for the REST surface.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Claims> {
    let token = bearer_token(headers)
        .or_else(|| cookie_token(headers))
        .ok_or_else(|| AppError::Auth("no credential found".to_string()))?;

    state
        .jwt_validator
        .validate(&token)
        .map_err(|reason| AppError::Auth(reason.to_string()))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|cookies| parse_cookie(cookies, SESSION_COOKIE))
}

/// Persist a message to `receiver`, then fan it out.
///
/// Routing runs only after `create` has returned; this response is the
/// sender's delivery confirmation, so the sender's own connection is never
/// pushed to.
#[tracing::instrument(
    name = "http.send_message",
    skip(state, headers, request),
    fields(receiver_id = %receiver_id)
)]
pub async fn send_message(
    State(state): State<AppState>,
    Path(receiver_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>)> {
    let claims = authenticate(&state, &headers)?;

    let new = NewMessage {
        sender_id: claims.sub,
        receiver_id,
        text: request.text,
        media_url: request.media_url,
    };

    if !new.has_content() {
        return Err(AppError::Validation(
            "Message content is required".to_string(),
        ));
    }

    let record = state.message_store.create(new).await?;
    let delivery = state.router.route(&record).await;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            message: record,
            delivery,
        }),
    ))
}

/// Conversation history between the caller and `peer_id`, oldest first.
#[tracing::instrument(
    name = "http.get_conversation",
    skip(state, headers),
    fields(peer_id = %peer_id)
)]
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<MessageRecord>>> {
    let claims = authenticate(&state, &headers)?;

    let messages = state
        .message_store
        .conversation(claims.user_id(), &peer_id)
        .await?;

    Ok(Json(messages))
}
