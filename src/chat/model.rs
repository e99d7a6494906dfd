//! Chat message records

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Immutable message in a trade's negotiation log (collection `messages`)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub trade_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a message
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub trade_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
}

/// Message composer submit
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}
