//! Per-trade chat between the two participants

use std::sync::Arc;

use uuid::Uuid;

use super::{ChatError, Message, MessageChannel, NewMessage};
use crate::session::SessionContext;
use crate::store::{ChangeBus, MessageRepository, StoreError, TradeRepository};

/// Longest accepted message, in characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Clone)]
pub struct ChatService {
    trades: Arc<dyn TradeRepository>,
    messages: Arc<dyn MessageRepository>,
    changes: ChangeBus,
}

impl ChatService {
    pub fn new(
        trades: Arc<dyn TradeRepository>,
        messages: Arc<dyn MessageRepository>,
        changes: ChangeBus,
    ) -> Self {
        Self {
            trades,
            messages,
            changes,
        }
    }

    async fn ensure_participant(
        &self,
        session: &SessionContext,
        trade_id: Uuid,
    ) -> Result<(), ChatError> {
        let trade = self.trades.get_trade(trade_id).await.map_err(|e| match e {
            StoreError::NotFound(_) => ChatError::TradeNotFound(trade_id),
            other => other.into(),
        })?;
        if !trade.is_participant(session.user_id()) {
            return Err(ChatError::Forbidden);
        }
        Ok(())
    }

    /// Append a message from the caller to the trade's log
    pub async fn send(
        &self,
        session: &SessionContext,
        trade_id: Uuid,
        content: &str,
    ) -> Result<Message, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::Validation("Message cannot be empty".to_string()));
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::Validation(format!(
                "Message is longer than {} characters",
                MAX_MESSAGE_CHARS
            )));
        }
        self.ensure_participant(session, trade_id).await?;

        let message = self
            .messages
            .insert_message(NewMessage {
                trade_id,
                sender_id: session.user_id(),
                content: content.to_string(),
            })
            .await?;

        tracing::debug!(trade_id = %trade_id, message_id = %message.id, "Message sent");
        Ok(message)
    }

    /// The trade's messages, oldest first
    pub async fn history(
        &self,
        session: &SessionContext,
        trade_id: Uuid,
    ) -> Result<Vec<Message>, ChatError> {
        self.ensure_participant(session, trade_id).await?;
        Ok(self.messages.list_messages(trade_id).await?)
    }

    /// Live view of the trade's messages
    pub async fn open_channel(
        &self,
        session: &SessionContext,
        trade_id: Uuid,
    ) -> Result<MessageChannel, ChatError> {
        self.ensure_participant(session, trade_id).await?;
        MessageChannel::open(trade_id, self.messages.clone(), &self.changes).await
    }
}
