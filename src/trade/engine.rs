//! Negotiation engine
//!
//! Owns the trade lifecycle: proposals start `pending`, and only the receiver
//! may move a trade to `completed` (accept) or `rejected` (reject). Both
//! outcomes are terminal. Accepting also consumes every listing involved and
//! bumps both parties' completed-trade counters, all in one store operation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::{
    InvalidTransition, ItemSummary, NewTrade, ProposeTradeRequest, Trade, TradeAction,
    TradeDetails, TradeParty, TradeSide, TradeSummary,
};
use crate::listing::Listing;
use crate::profile::{ProfileError, ProfileProvisioner};
use crate::session::SessionContext;
use crate::store::{ListingRepository, ProfileRepository, StoreError, TradeRepository};

/// Negotiation errors
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Trade not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Remove repeated ids, keeping first occurrences in order
fn dedup_ids(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

#[derive(Clone)]
pub struct NegotiationEngine {
    trades: Arc<dyn TradeRepository>,
    listings: Arc<dyn ListingRepository>,
    profiles: Arc<dyn ProfileRepository>,
    provisioner: ProfileProvisioner,
}

impl NegotiationEngine {
    pub fn new(
        trades: Arc<dyn TradeRepository>,
        listings: Arc<dyn ListingRepository>,
        profiles: Arc<dyn ProfileRepository>,
    ) -> Self {
        let provisioner = ProfileProvisioner::new(profiles.clone());
        Self {
            trades,
            listings,
            profiles,
            provisioner,
        }
    }

    /// Offer the caller's listings for some of the receiver's
    pub async fn propose(
        &self,
        session: &SessionContext,
        request: ProposeTradeRequest,
    ) -> Result<Trade, NegotiationError> {
        let requester_id = session.user_id();
        if request.receiver_id == requester_id {
            return Err(NegotiationError::Validation(
                "Cannot propose a trade to yourself".to_string(),
            ));
        }

        let requester_items = dedup_ids(request.requester_items);
        let receiver_items = dedup_ids(request.receiver_items);
        if requester_items.is_empty() {
            return Err(NegotiationError::Validation(
                "Select at least one of your items to offer".to_string(),
            ));
        }
        if receiver_items.is_empty() {
            return Err(NegotiationError::Validation(
                "Select at least one item you want".to_string(),
            ));
        }
        if requester_items.iter().any(|id| receiver_items.contains(id)) {
            return Err(NegotiationError::Validation(
                "An item cannot be on both sides of a trade".to_string(),
            ));
        }

        let ids: Vec<Uuid> = requester_items
            .iter()
            .chain(receiver_items.iter())
            .copied()
            .collect();
        let found: HashMap<Uuid, Listing> = self
            .listings
            .get_listings(&ids)
            .await?
            .into_iter()
            .map(|l| (l.id, l))
            .collect();

        for (side, items, owner) in [
            ("offered", &requester_items, requester_id),
            ("requested", &receiver_items, request.receiver_id),
        ] {
            for id in items {
                let listing = found.get(id).ok_or_else(|| {
                    NegotiationError::Validation(format!("Unknown listing {}", id))
                })?;
                if listing.owner_id != owner {
                    return Err(NegotiationError::Validation(format!(
                        "Listing {} is not one of the {} owner's items",
                        id, side
                    )));
                }
                if !listing.is_available() {
                    return Err(NegotiationError::Conflict(format!(
                        "Listing {} is no longer available",
                        id
                    )));
                }
            }
        }

        self.provisioner.ensure_profile(&session.identity).await?;

        let trade = self
            .trades
            .insert_trade(NewTrade {
                requester_id,
                receiver_id: request.receiver_id,
                requester_items,
                receiver_items,
            })
            .await?;

        tracing::info!(
            trade_id = %trade.id,
            requester_id = %trade.requester_id,
            receiver_id = %trade.receiver_id,
            "Trade proposed"
        );
        Ok(trade)
    }

    pub async fn accept(
        &self,
        session: &SessionContext,
        trade_id: Uuid,
    ) -> Result<Trade, NegotiationError> {
        self.respond(session, trade_id, TradeAction::Accept).await
    }

    pub async fn reject(
        &self,
        session: &SessionContext,
        trade_id: Uuid,
    ) -> Result<Trade, NegotiationError> {
        self.respond(session, trade_id, TradeAction::Reject).await
    }

    /// Apply the receiver's decision to a pending trade
    pub async fn respond(
        &self,
        session: &SessionContext,
        trade_id: Uuid,
        action: TradeAction,
    ) -> Result<Trade, NegotiationError> {
        let trade = self.load(trade_id).await?;
        if trade.receiver_id != session.user_id() {
            tracing::warn!(
                trade_id = %trade_id,
                user_id = %session.user_id(),
                ?action,
                "Non-receiver tried to respond to a trade"
            );
            return Err(NegotiationError::Forbidden(
                "Only the receiver can respond to this trade".to_string(),
            ));
        }
        trade.status.apply(action)?;

        let at = Utc::now();
        let result = match action {
            TradeAction::Accept => {
                self.trades
                    .complete_trade(trade_id, trade.receiver_id, at)
                    .await
            }
            TradeAction::Reject => {
                self.trades
                    .reject_trade(trade_id, trade.receiver_id, at)
                    .await
            }
        };

        match result {
            Ok(updated) => {
                tracing::info!(
                    trade_id = %trade_id,
                    status = updated.status.as_str(),
                    "Trade resolved"
                );
                Ok(updated)
            }
            Err(StoreError::Conflict(reason)) => {
                // Either another response won the race or the listings are gone
                let current = self.load(trade_id).await?;
                if current.status.is_terminal() {
                    Err(InvalidTransition {
                        from: current.status,
                        action,
                    }
                    .into())
                } else {
                    Err(NegotiationError::Conflict(reason))
                }
            }
            Err(StoreError::NotFound(_)) => Err(NegotiationError::NotFound(trade_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// The caller's received or sent trades, newest first
    pub async fn list(
        &self,
        session: &SessionContext,
        side: TradeSide,
    ) -> Result<Vec<TradeSummary>, NegotiationError> {
        let trades = self.trades.list_trades(session.user_id(), side).await?;
        self.summarize(trades).await
    }

    /// One trade with the counterpart's identity, for participants only
    pub async fn view(
        &self,
        session: &SessionContext,
        trade_id: Uuid,
    ) -> Result<TradeDetails, NegotiationError> {
        let trade = self.load(trade_id).await?;
        if !trade.is_participant(session.user_id()) {
            return Err(NegotiationError::Forbidden(
                "Only trade participants can view this trade".to_string(),
            ));
        }

        let trader_id = trade.counterpart_of(session.user_id());
        let summary = self
            .summarize(vec![trade])
            .await?
            .pop()
            .ok_or(NegotiationError::NotFound(trade_id))?;

        let trader_name = if summary.requester.user_id == trader_id {
            summary.requester.username.clone()
        } else {
            summary.receiver.username.clone()
        };

        Ok(TradeDetails {
            summary,
            trader_id,
            trader_name,
        })
    }

    async fn load(&self, trade_id: Uuid) -> Result<Trade, NegotiationError> {
        self.trades.get_trade(trade_id).await.map_err(|e| match e {
            StoreError::NotFound(_) => NegotiationError::NotFound(trade_id),
            other => other.into(),
        })
    }

    /// Join usernames and item summaries onto trades
    async fn summarize(&self, trades: Vec<Trade>) -> Result<Vec<TradeSummary>, NegotiationError> {
        let item_ids = dedup_ids(trades.iter().flat_map(Trade::involved_items).collect());
        let items: HashMap<Uuid, ItemSummary> = self
            .listings
            .get_listings(&item_ids)
            .await?
            .into_iter()
            .map(|l| {
                (
                    l.id,
                    ItemSummary {
                        id: l.id,
                        title: l.title,
                        estimated_value: l.estimated_value,
                    },
                )
            })
            .collect();

        let user_ids = dedup_ids(
            trades
                .iter()
                .flat_map(|t| [t.requester_id, t.receiver_id])
                .collect(),
        );
        let mut usernames = HashMap::with_capacity(user_ids.len());
        for id in user_ids {
            match self.profiles.get_profile(id).await {
                Ok(profile) => {
                    usernames.insert(id, profile.username);
                }
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let party = |user_id: Uuid, ids: &[Uuid]| TradeParty {
            user_id,
            username: usernames.get(&user_id).cloned(),
            items: ids.iter().filter_map(|id| items.get(id).cloned()).collect(),
        };

        Ok(trades
            .iter()
            .map(|t| TradeSummary {
                id: t.id,
                status: t.status,
                created_at: t.created_at,
                updated_at: t.updated_at,
                requester: party(t.requester_id, &t.requester_items),
                receiver: party(t.receiver_id, &t.receiver_items),
            })
            .collect())
    }
}
