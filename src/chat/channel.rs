//! Live message log of one trade
//!
//! A channel subscribes to message inserts for its trade before it loads the
//! history, so nothing written in between is lost. The log is kept sorted by
//! `created_at` no matter in which order inserts arrive, and a message that
//! shows up twice (history and push) is kept once.

use std::sync::Arc;

use uuid::Uuid;

use super::{ChatError, Message};
use crate::models::LoadState;
use crate::store::{
    ChangeBus, ChangeKind, Collection, MessageRepository, Notification, RowFilter, Subscription,
};

/// What changed in the log after [`MessageChannel::next`]
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelUpdate {
    Appended(Message),
    /// Notifications were missed and the whole log was re-read
    Reloaded,
}

pub struct MessageChannel {
    trade_id: Uuid,
    messages: Arc<dyn MessageRepository>,
    subscription: Option<Subscription>,
    log: Vec<Message>,
    state: LoadState,
}

impl MessageChannel {
    /// Subscribe to the trade's messages and load its history
    pub async fn open(
        trade_id: Uuid,
        messages: Arc<dyn MessageRepository>,
        changes: &ChangeBus,
    ) -> Result<Self, ChatError> {
        let subscription =
            changes.subscribe(Collection::Messages, Some(RowFilter::eq("trade_id", trade_id)));

        let mut channel = Self {
            trade_id,
            messages,
            subscription: Some(subscription),
            log: Vec::new(),
            state: LoadState::Loading,
        };
        channel.reload().await?;

        tracing::debug!(
            trade_id = %trade_id,
            count = channel.log.len(),
            "Message channel opened"
        );
        Ok(channel)
    }

    pub fn trade_id(&self) -> Uuid {
        self.trade_id
    }

    /// Messages, oldest first
    pub fn messages(&self) -> &[Message] {
        &self.log
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// Insert a message at its `created_at` position. Returns false for a
    /// message already in the log or one from another trade.
    pub fn apply(&mut self, message: Message) -> bool {
        if message.trade_id != self.trade_id || self.log.iter().any(|m| m.id == message.id) {
            return false;
        }
        // Equal timestamps keep arrival order
        let at = self
            .log
            .partition_point(|m| m.created_at <= message.created_at);
        self.log.insert(at, message);
        true
    }

    /// Replace the log with the stored history
    pub async fn reload(&mut self) -> Result<(), ChatError> {
        match self.messages.list_messages(self.trade_id).await {
            Ok(history) => {
                self.log.clear();
                for message in history {
                    self.apply(message);
                }
                self.state = LoadState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = LoadState::failed(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Wait for the next change to the log. `None` once the channel is closed.
    pub async fn next(&mut self) -> Option<ChannelUpdate> {
        loop {
            let notification = self.subscription.as_mut()?.next().await;
            match notification {
                Some(Notification::Change(event)) => {
                    if event.kind != ChangeKind::Insert {
                        continue;
                    }
                    let message: Message = match serde_json::from_value(event.row) {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::warn!(
                                trade_id = %self.trade_id,
                                error = %e,
                                "Dropping malformed message notification"
                            );
                            continue;
                        }
                    };
                    if self.apply(message.clone()) {
                        return Some(ChannelUpdate::Appended(message));
                    }
                }
                Some(Notification::Missed(missed)) => {
                    tracing::debug!(trade_id = %self.trade_id, missed, "Reloading message log");
                    if let Err(e) = self.reload().await {
                        tracing::warn!(
                            trade_id = %self.trade_id,
                            error = %e,
                            "Message reload failed"
                        );
                    }
                    return Some(ChannelUpdate::Reloaded);
                }
                None => {
                    self.subscription = None;
                    return None;
                }
            }
        }
    }

    /// Stop listening for new messages
    pub fn close(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
