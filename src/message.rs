//! In-flight chat messages. Never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel sender id for messages the operator injects directly.
pub const SERVER_SENDER: &str = "SERVER";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub sender_id: String,
    pub time: DateTime<Utc>,
    pub body: String,
}

impl Message {
    pub fn new(sender_id: impl Into<String>, body: impl Into<String>) -> Self {
        Message {
            sender_id: sender_id.into(),
            time: Utc::now(),
            body: body.into(),
        }
    }

    pub fn from_server(body: impl Into<String>) -> Self {
        Message::new(SERVER_SENDER, body)
    }

    pub fn is_from_server(&self) -> bool {
        self.sender_id == SERVER_SENDER
    }
}
