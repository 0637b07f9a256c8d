use serde::{Deserialize, Serialize};

use crate::relay::MessageRecord;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "getOnlineUsers")]
    GetOnlineUsers,
    #[serde(rename = "ping")]
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Current online peers as seen by the recipient (never includes itself)
    #[serde(rename = "onlineUsers")]
    OnlineUsers {
        #[serde(rename = "payload")]
        users: Vec<String>,
    },
    /// A freshly persisted message addressed to the recipient
    #[serde(rename = "newMessage")]
    NewMessage {
        #[serde(rename = "payload")]
        message: MessageRecord,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn online_users(users: Vec<String>) -> Self {
        Self::OnlineUsers { users }
    }

    pub fn new_message(message: MessageRecord) -> Self {
        Self::NewMessage { message }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}
