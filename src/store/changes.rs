//! Change notification channel
//!
//! Every write to a collection is published on a [`ChangeBus`] as a
//! [`ChangeEvent`]. Consumers subscribe to one collection, optionally narrowed
//! by a `column = value` row filter, and must drop (or explicitly
//! [`Subscription::unsubscribe`]) their subscription when they go away.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

/// Buffered events per subscriber before it is reported as lagging
const CHANGE_BUS_CAPACITY: usize = 256;

/// Named collections of the structured store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Profiles,
    Items,
    TradeRequests,
    Messages,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Profiles => "profiles",
            Collection::Items => "items",
            Collection::TradeRequests => "trade_requests",
            Collection::Messages => "messages",
        }
    }
}

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A single row change, carrying the row as it was written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub kind: ChangeKind,
    pub row: Value,
}

impl ChangeEvent {
    pub fn new<T: Serialize>(collection: Collection, kind: ChangeKind, row: &T) -> Self {
        Self {
            collection,
            kind,
            row: serde_json::to_value(row).unwrap_or(Value::Null),
        }
    }
}

/// Equality filter on one column of the changed row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

/// What a subscriber receives
#[derive(Debug, Clone)]
pub enum Notification {
    Change(ChangeEvent),
    /// The subscriber fell behind and this many events were dropped
    Missed(u64),
}

/// Fan-out of change events to every live subscription
#[derive(Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANGE_BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: ChangeEvent) {
        let collection = event.collection;
        let kind = event.kind;
        if self.tx.send(event).is_err() {
            tracing::trace!(collection = collection.as_str(), ?kind, "No change subscribers");
        }
    }

    pub fn subscribe(&self, collection: Collection, filter: Option<RowFilter>) -> Subscription {
        tracing::debug!(
            collection = collection.as_str(),
            filter = ?filter,
            "Change subscription opened"
        );
        Subscription {
            collection,
            filter,
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Live subscription to one collection
pub struct Subscription {
    collection: Collection,
    filter: Option<RowFilter>,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Wait for the next matching change. `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.collection != self.collection {
                        continue;
                    }
                    if let Some(filter) = &self.filter {
                        if !filter.matches(&event.row) {
                            continue;
                        }
                    }
                    return Some(Notification::Change(event));
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(
                        collection = self.collection.as_str(),
                        missed,
                        "Change subscription lagged"
                    );
                    return Some(Notification::Missed(missed));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Release the subscription
    pub fn unsubscribe(self) {
        tracing::debug!(
            collection = self.collection.as_str(),
            "Change subscription released"
        );
    }
}
