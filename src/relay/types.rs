use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted chat message, referenced here by value.
///
/// The system of record assigns `id` and `created_at` when the message is
/// created; the relay only reads the record to deliver it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// URL of already-uploaded media, substituted before persistence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Content for a message about to be persisted
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub media_url: Option<String>,
}

impl NewMessage {
    /// A message needs at least text or media to be persistable.
    pub fn has_content(&self) -> bool {
        self.text.is_some() || self.media_url.is_some()
    }
}
