//! Trade models, status rules and DTOs

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Trade proposal (collection `trade_requests`)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Trade {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub receiver_id: Uuid,
    pub requester_items: Vec<Uuid>,
    pub receiver_items: Vec<Uuid>,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.requester_id == user_id || self.receiver_id == user_id
    }

    /// The other side of the trade as seen by `user_id`
    pub fn counterpart_of(&self, user_id: Uuid) -> Uuid {
        if self.requester_id == user_id {
            self.receiver_id
        } else {
            self.requester_id
        }
    }

    /// Every listing the trade would consume, requester side first
    pub fn involved_items(&self) -> Vec<Uuid> {
        self.requester_items
            .iter()
            .chain(self.receiver_items.iter())
            .copied()
            .collect()
    }

    /// Reject rows that break the record invariants
    pub fn check_row(&self) -> Result<(), String> {
        if self.requester_id == self.receiver_id {
            return Err(format!("trade {} has the same requester and receiver", self.id));
        }
        if self.requester_items.is_empty() {
            return Err(format!("trade {} offers no items", self.id));
        }
        Ok(())
    }
}

/// Trade status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "trade_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,   // Proposed, awaiting the receiver
    Completed, // Accepted by the receiver
    Rejected,  // Declined by the receiver
}

/// What the receiver can do with a pending trade
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Accept,
    Reject,
}

/// A transition that the status rules do not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action:?} a trade that is {from:?}")]
pub struct InvalidTransition {
    pub from: TradeStatus,
    pub action: TradeAction,
}

impl TradeStatus {
    /// Terminal states never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, TradeStatus::Completed | TradeStatus::Rejected)
    }

    /// Next status for `action`, if the rules allow it
    pub fn apply(self, action: TradeAction) -> Result<TradeStatus, InvalidTransition> {
        match (self, action) {
            (TradeStatus::Pending, TradeAction::Accept) => Ok(TradeStatus::Completed),
            (TradeStatus::Pending, TradeAction::Reject) => Ok(TradeStatus::Rejected),
            (from, action) => Err(InvalidTransition { from, action }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Completed => "completed",
            TradeStatus::Rejected => "rejected",
        }
    }
}

/// Insert payload for a trade
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub requester_id: Uuid,
    pub receiver_id: Uuid,
    pub requester_items: Vec<Uuid>,
    pub receiver_items: Vec<Uuid>,
}

/// Which inbox to read
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    #[default]
    Received,
    Sent,
}

/// Swap request form
#[derive(Debug, Deserialize)]
pub struct ProposeTradeRequest {
    pub receiver_id: Uuid,
    pub requester_items: Vec<Uuid>,
    pub receiver_items: Vec<Uuid>,
}

/// Query parameters for the trades inbox
#[derive(Debug, Deserialize, Default)]
pub struct ListTradesQuery {
    #[serde(rename = "box", default)]
    pub side: TradeSide,
}

/// Item line shown in trade history
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ItemSummary {
    pub id: Uuid,
    pub title: String,
    pub estimated_value: f64,
}

/// One side of a trade as rendered in history
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TradeParty {
    pub user_id: Uuid,
    pub username: Option<String>,
    pub items: Vec<ItemSummary>,
}

/// Trade history row
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TradeSummary {
    pub id: Uuid,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub requester: TradeParty,
    pub receiver: TradeParty,
}

/// Trade chat header: the trade plus who is on the other side
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TradeDetails {
    #[serde(flatten)]
    pub summary: TradeSummary,
    pub trader_id: Uuid,
    pub trader_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_transitions() {
        assert_eq!(
            TradeStatus::Pending.apply(TradeAction::Accept),
            Ok(TradeStatus::Completed)
        );
        assert_eq!(
            TradeStatus::Pending.apply(TradeAction::Reject),
            Ok(TradeStatus::Rejected)
        );
    }

    #[test]
    fn test_terminal_states_reject_every_action() {
        for from in [TradeStatus::Completed, TradeStatus::Rejected] {
            assert!(from.is_terminal());
            for action in [TradeAction::Accept, TradeAction::Reject] {
                assert_eq!(from.apply(action), Err(InvalidTransition { from, action }));
            }
        }
        assert!(!TradeStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&TradeStatus::Completed).unwrap(),
            "\"completed\""
        );
        let side: ListTradesQuery = serde_json::from_str(r#"{"box":"sent"}"#).unwrap();
        assert_eq!(side.side, TradeSide::Sent);
    }
}
