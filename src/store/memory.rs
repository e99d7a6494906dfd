//! In-memory structured store
//!
//! Same contracts as the PostgreSQL store, held under one lock so that
//! multi-row writes such as trade completion are atomic. Used by the test
//! suite and for local development without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    checked, ChangeBus, ChangeEvent, ChangeKind, Collection, CredentialStore, ListingRepository,
    MessageRepository, ProfileRepository, StoreError, StoreHealth, StoreResult, TradeRepository,
};
use crate::chat::{Message, NewMessage};
use crate::listing::{Listing, ListingStatus, ListingWithOwner, NewListing, OwnerSummary};
use crate::models::{Account, AuthSession, NewAuthSession};
use crate::profile::{NewProfile, Profile, ProfilePatch};
use crate::trade::{NewTrade, Trade, TradeSide, TradeStatus};

#[derive(Default)]
struct Tables {
    profiles: HashMap<Uuid, Profile>,
    // Insertion order is kept so equal timestamps still sort deterministically
    listings: Vec<Listing>,
    trades: Vec<Trade>,
    messages: Vec<Message>,
    accounts: HashMap<Uuid, Account>,
    sessions: Vec<AuthSession>,
}

impl Tables {
    fn owner_summary(&self, owner_id: Uuid) -> Option<OwnerSummary> {
        self.profiles.get(&owner_id).map(|p| OwnerSummary {
            username: p.username.clone(),
            reputation_score: p.reputation_score,
            trades_completed: p.trades_completed,
        })
    }

    fn with_owner(&self, listing: &Listing) -> ListingWithOwner {
        ListingWithOwner {
            listing: listing.clone(),
            owner: self.owner_summary(listing.owner_id),
        }
    }

    fn username_taken(&self, username: &str, except: Option<Uuid>) -> bool {
        self.profiles
            .values()
            .any(|p| p.username == username && Some(p.id) != except)
    }
}

/// In-memory store
pub struct MemoryStore {
    tables: RwLock<Tables>,
    changes: ChangeBus,
}

impl MemoryStore {
    pub fn new(changes: ChangeBus) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            changes,
        }
    }

    pub fn changes(&self) -> &ChangeBus {
        &self.changes
    }

    /// Overwrite a listing's status without publishing a change event.
    ///
    /// Simulates a write whose notification was lost in transit.
    pub async fn set_listing_status_silently(
        &self,
        id: Uuid,
        status: ListingStatus,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let listing = tables
            .listings
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("listing {}", id)))?;
        listing.status = status;
        Ok(())
    }

    /// Insert a message with an explicit timestamp (replays and imports)
    pub async fn insert_message_at(
        &self,
        message: NewMessage,
        created_at: DateTime<Utc>,
    ) -> StoreResult<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            trade_id: message.trade_id,
            sender_id: message.sender_id,
            content: message.content,
            created_at,
        };
        self.tables.write().await.messages.push(message.clone());
        self.changes.publish(ChangeEvent::new(
            Collection::Messages,
            ChangeKind::Insert,
            &message,
        ));
        Ok(message)
    }
}

#[async_trait]
impl ProfileRepository for MemoryStore {
    async fn get_profile(&self, id: Uuid) -> StoreResult<Profile> {
        let tables = self.tables.read().await;
        let profile = tables
            .profiles
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", id)))?;
        checked(profile, Profile::check_row)
    }

    async fn find_profile_by_username(&self, username: &str) -> StoreResult<Option<Profile>> {
        let tables = self.tables.read().await;
        Ok(tables
            .profiles
            .values()
            .find(|p| p.username == username)
            .cloned())
    }

    async fn insert_profile(&self, profile: NewProfile) -> StoreResult<Profile> {
        let mut tables = self.tables.write().await;
        if tables.profiles.contains_key(&profile.id) {
            return Err(StoreError::Conflict(format!(
                "profiles_pkey: profile {} already exists",
                profile.id
            )));
        }
        if tables.username_taken(&profile.username, None) {
            return Err(StoreError::Conflict(format!(
                "profiles_username_key: username {} already exists",
                profile.username
            )));
        }

        let now = Utc::now();
        let profile = Profile {
            id: profile.id,
            username: profile.username,
            avatar_url: profile.avatar_url,
            reputation_score: 0.0,
            trades_completed: 0,
            created_at: now,
            updated_at: now,
        };
        tables.profiles.insert(profile.id, profile.clone());
        drop(tables);

        self.changes.publish(ChangeEvent::new(
            Collection::Profiles,
            ChangeKind::Insert,
            &profile,
        ));
        Ok(profile)
    }

    async fn update_profile(&self, id: Uuid, patch: ProfilePatch) -> StoreResult<Profile> {
        let mut tables = self.tables.write().await;
        if let Some(username) = &patch.username {
            if tables.username_taken(username, Some(id)) {
                return Err(StoreError::Conflict(format!(
                    "profiles_username_key: username {} already exists",
                    username
                )));
            }
        }

        let profile = tables
            .profiles
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", id)))?;
        if let Some(username) = patch.username {
            profile.username = username;
        }
        if let Some(avatar_url) = patch.avatar_url {
            profile.avatar_url = avatar_url;
        }
        profile.updated_at = Utc::now();
        let profile = profile.clone();
        drop(tables);

        self.changes.publish(ChangeEvent::new(
            Collection::Profiles,
            ChangeKind::Update,
            &profile,
        ));
        Ok(profile)
    }
}

#[async_trait]
impl ListingRepository for MemoryStore {
    async fn insert_listing(&self, listing: NewListing) -> StoreResult<Listing> {
        let listing = Listing {
            id: Uuid::new_v4(),
            owner_id: listing.owner_id,
            title: listing.title,
            description: listing.description,
            condition: listing.condition,
            category: listing.category,
            estimated_value: listing.estimated_value,
            images: listing.images,
            status: ListingStatus::Available,
            created_at: Utc::now(),
        };
        let listing = checked(listing, Listing::check_row)?;
        self.tables.write().await.listings.push(listing.clone());

        self.changes
            .publish(ChangeEvent::new(Collection::Items, ChangeKind::Insert, &listing));
        Ok(listing)
    }

    async fn get_listing(&self, id: Uuid) -> StoreResult<ListingWithOwner> {
        let tables = self.tables.read().await;
        let listing = tables
            .listings
            .iter()
            .find(|l| l.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("listing {}", id)))?;
        let listing = checked(listing.clone(), Listing::check_row)?;
        Ok(tables.with_owner(&listing))
    }

    async fn list_available(&self) -> StoreResult<Vec<ListingWithOwner>> {
        let tables = self.tables.read().await;
        let mut listings: Vec<&Listing> = tables
            .listings
            .iter()
            .rev()
            .filter(|l| l.is_available())
            .collect();
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        listings
            .into_iter()
            .map(|l| checked(l.clone(), Listing::check_row).map(|l| tables.with_owner(&l)))
            .collect()
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        status: Option<ListingStatus>,
    ) -> StoreResult<Vec<Listing>> {
        let tables = self.tables.read().await;
        let mut listings: Vec<Listing> = tables
            .listings
            .iter()
            .rev()
            .filter(|l| l.owner_id == owner_id)
            .filter(|l| status.map_or(true, |s| l.status == s))
            .cloned()
            .collect();
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        listings
            .into_iter()
            .map(|l| checked(l, Listing::check_row))
            .collect()
    }

    async fn get_listings(&self, ids: &[Uuid]) -> StoreResult<Vec<Listing>> {
        let tables = self.tables.read().await;
        ids.iter()
            .filter_map(|id| tables.listings.iter().find(|l| l.id == *id))
            .map(|l| checked(l.clone(), Listing::check_row))
            .collect()
    }
}

#[async_trait]
impl TradeRepository for MemoryStore {
    async fn insert_trade(&self, trade: NewTrade) -> StoreResult<Trade> {
        let now = Utc::now();
        let trade = Trade {
            id: Uuid::new_v4(),
            requester_id: trade.requester_id,
            receiver_id: trade.receiver_id,
            requester_items: trade.requester_items,
            receiver_items: trade.receiver_items,
            status: TradeStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let trade = checked(trade, Trade::check_row)?;
        self.tables.write().await.trades.push(trade.clone());

        self.changes.publish(ChangeEvent::new(
            Collection::TradeRequests,
            ChangeKind::Insert,
            &trade,
        ));
        Ok(trade)
    }

    async fn get_trade(&self, id: Uuid) -> StoreResult<Trade> {
        let tables = self.tables.read().await;
        let trade = tables
            .trades
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("trade {}", id)))?;
        checked(trade, Trade::check_row)
    }

    async fn list_trades(&self, user_id: Uuid, side: TradeSide) -> StoreResult<Vec<Trade>> {
        let tables = self.tables.read().await;
        let mut trades: Vec<Trade> = tables
            .trades
            .iter()
            .rev()
            .filter(|t| match side {
                TradeSide::Received => t.receiver_id == user_id,
                TradeSide::Sent => t.requester_id == user_id,
            })
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        trades
            .into_iter()
            .map(|t| checked(t, Trade::check_row))
            .collect()
    }

    async fn reject_trade(
        &self,
        id: Uuid,
        receiver_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Trade> {
        let mut tables = self.tables.write().await;
        let trade = tables
            .trades
            .iter_mut()
            .find(|t| t.id == id && t.receiver_id == receiver_id)
            .ok_or_else(|| StoreError::NotFound(format!("trade {}", id)))?;
        if trade.status != TradeStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "trade {} is already {}",
                id,
                trade.status.as_str()
            )));
        }
        trade.status = TradeStatus::Rejected;
        trade.updated_at = at;
        let trade = trade.clone();
        drop(tables);

        self.changes.publish(ChangeEvent::new(
            Collection::TradeRequests,
            ChangeKind::Update,
            &trade,
        ));
        Ok(trade)
    }

    async fn complete_trade(
        &self,
        id: Uuid,
        receiver_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Trade> {
        let mut tables = self.tables.write().await;
        let index = tables
            .trades
            .iter()
            .position(|t| t.id == id && t.receiver_id == receiver_id)
            .ok_or_else(|| StoreError::NotFound(format!("trade {}", id)))?;

        let trade = tables.trades[index].clone();
        if trade.status != TradeStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "trade {} is already {}",
                id,
                trade.status.as_str()
            )));
        }

        // Validate everything before the first write so a failure leaves no trace
        let involved = trade.involved_items();
        for item_id in &involved {
            let available = tables
                .listings
                .iter()
                .any(|l| l.id == *item_id && l.is_available());
            if !available {
                return Err(StoreError::Conflict(format!(
                    "listing {} is no longer available",
                    item_id
                )));
            }
        }

        let mut traded = Vec::with_capacity(involved.len());
        for listing in tables.listings.iter_mut() {
            if involved.contains(&listing.id) {
                listing.status = ListingStatus::Traded;
                traded.push(listing.clone());
            }
        }

        let mut bumped = Vec::with_capacity(2);
        for party in [trade.requester_id, trade.receiver_id] {
            if let Some(profile) = tables.profiles.get_mut(&party) {
                profile.trades_completed += 1;
                profile.updated_at = at;
                bumped.push(profile.clone());
            }
        }

        let trade = {
            let stored = &mut tables.trades[index];
            stored.status = TradeStatus::Completed;
            stored.updated_at = at;
            stored.clone()
        };
        drop(tables);

        self.changes.publish(ChangeEvent::new(
            Collection::TradeRequests,
            ChangeKind::Update,
            &trade,
        ));
        for listing in &traded {
            self.changes
                .publish(ChangeEvent::new(Collection::Items, ChangeKind::Update, listing));
        }
        for profile in &bumped {
            self.changes
                .publish(ChangeEvent::new(Collection::Profiles, ChangeKind::Update, profile));
        }
        Ok(trade)
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        self.insert_message_at(message, Utc::now()).await
    }

    async fn list_messages(&self, trade_id: Uuid) -> StoreResult<Vec<Message>> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.trade_id == trade_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_account(&self, email: &str, password_hash: &str) -> StoreResult<Account> {
        // Stored lowercased, matching the Postgres backend
        let email = email.to_lowercase();
        let mut tables = self.tables.write().await;
        if tables.accounts.values().any(|a| a.email == email) {
            return Err(StoreError::Conflict(format!(
                "auth_accounts_email_key: {} already registered",
                email
            )));
        }
        let account = Account {
            id: Uuid::new_v4(),
            email,
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let email = email.to_lowercase();
        let tables = self.tables.read().await;
        Ok(tables.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn get_account(&self, id: Uuid) -> StoreResult<Account> {
        let tables = self.tables.read().await;
        tables
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("account {}", id)))
    }

    async fn insert_session(&self, session: NewAuthSession) -> StoreResult<AuthSession> {
        let now = Utc::now();
        let session = AuthSession {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            jti: session.jti,
            refresh_token_hash: session.refresh_token_hash,
            expires_at: session.expires_at,
            revoked: false,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.sessions.push(session.clone());
        Ok(session)
    }

    async fn find_active_session(&self, jti: &str) -> StoreResult<Option<AuthSession>> {
        let now = Utc::now();
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .iter()
            .find(|s| s.jti == jti && !s.revoked && s.expires_at > now)
            .cloned())
    }

    async fn find_session_by_refresh_hash(
        &self,
        hash: &str,
    ) -> StoreResult<Option<AuthSession>> {
        let now = Utc::now();
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .iter()
            .find(|s| s.refresh_token_hash == hash && !s.revoked && s.expires_at > now)
            .cloned())
    }

    async fn rotate_session(
        &self,
        session_id: Uuid,
        jti: &str,
        refresh_token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let session = tables
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session_id)))?;
        session.jti = jti.to_string();
        session.refresh_token_hash = refresh_token_hash.to_string();
        session.expires_at = expires_at;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn revoke_session(&self, jti: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables
            .sessions
            .iter_mut()
            .find(|s| s.jti == jti && !s.revoked)
        {
            Some(session) => {
                session.revoked = true;
                session.revoked_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl StoreHealth for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
