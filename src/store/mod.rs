//! Structured store
//!
//! Typed repositories over the four collections (`profiles`, `items`,
//! `trade_requests`, `messages`) plus the auth provider's credential tables.
//! Rows are validated when they cross this boundary; anything that does not
//! decode into the typed record is reported as [`StoreError::Malformed`].

mod changes;
pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::chat::{Message, NewMessage};
use crate::listing::{Listing, ListingStatus, ListingWithOwner, NewListing};
use crate::models::{Account, AuthSession, NewAuthSession};
use crate::profile::{NewProfile, Profile, ProfilePatch};
use crate::trade::{NewTrade, Trade, TradeSide};

pub use changes::{
    ChangeBus, ChangeEvent, ChangeKind, Collection, Notification, RowFilter, Subscription,
};
pub use memory::MemoryStore;
pub use postgres::{spawn_change_pump, PgStore};

/// Store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Malformed row: {0}")]
    Malformed(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Reject a decoded row that breaks its record invariants
pub(crate) fn checked<T>(row: T, check: impl Fn(&T) -> Result<(), String>) -> StoreResult<T> {
    check(&row).map_err(|reason| {
        tracing::warn!(reason = %reason, "Rejecting malformed row");
        StoreError::Malformed(reason)
    })?;
    Ok(row)
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// `NotFound` when the identity has no profile yet
    async fn get_profile(&self, id: Uuid) -> StoreResult<Profile>;

    async fn find_profile_by_username(&self, username: &str) -> StoreResult<Option<Profile>>;

    /// `Conflict` when the id or the username already exists
    async fn insert_profile(&self, profile: NewProfile) -> StoreResult<Profile>;

    async fn update_profile(&self, id: Uuid, patch: ProfilePatch) -> StoreResult<Profile>;
}

#[async_trait]
pub trait ListingRepository: Send + Sync {
    async fn insert_listing(&self, listing: NewListing) -> StoreResult<Listing>;

    async fn get_listing(&self, id: Uuid) -> StoreResult<ListingWithOwner>;

    /// Available listings, newest first
    async fn list_available(&self) -> StoreResult<Vec<ListingWithOwner>>;

    /// A user's listings, newest first, optionally narrowed by status
    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        status: Option<ListingStatus>,
    ) -> StoreResult<Vec<Listing>>;

    /// Listings by id, unknown ids skipped
    async fn get_listings(&self, ids: &[Uuid]) -> StoreResult<Vec<Listing>>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn insert_trade(&self, trade: NewTrade) -> StoreResult<Trade>;

    async fn get_trade(&self, id: Uuid) -> StoreResult<Trade>;

    /// Trades where the user is receiver (`Received`) or requester (`Sent`), newest first
    async fn list_trades(&self, user_id: Uuid, side: TradeSide) -> StoreResult<Vec<Trade>>;

    /// Move a pending trade addressed to `receiver_id` to `rejected`.
    /// `Conflict` when the trade is no longer pending.
    async fn reject_trade(
        &self,
        id: Uuid,
        receiver_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Trade>;

    /// Atomically move a pending trade to `completed`, mark every involved
    /// listing `traded` and bump both parties' `trades_completed`.
    /// `Conflict` when the trade is no longer pending or any listing is no
    /// longer available; nothing is written in that case.
    async fn complete_trade(
        &self,
        id: Uuid,
        receiver_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Trade>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message>;

    /// Messages of a trade, oldest first
    async fn list_messages(&self, trade_id: Uuid) -> StoreResult<Vec<Message>>;
}

/// Account and session tables of the auth provider
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Conflict` when the email is already registered
    async fn create_account(&self, email: &str, password_hash: &str) -> StoreResult<Account>;

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    async fn get_account(&self, id: Uuid) -> StoreResult<Account>;

    async fn insert_session(&self, session: NewAuthSession) -> StoreResult<AuthSession>;

    /// Unrevoked, unexpired session by token id
    async fn find_active_session(&self, jti: &str) -> StoreResult<Option<AuthSession>>;

    /// Unrevoked, unexpired session by refresh token hash
    async fn find_session_by_refresh_hash(&self, hash: &str)
        -> StoreResult<Option<AuthSession>>;

    async fn rotate_session(
        &self,
        session_id: Uuid,
        jti: &str,
        refresh_token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Returns false when no active session had that id
    async fn revoke_session(&self, jti: &str) -> StoreResult<bool>;
}

/// Health probe for the backing store
#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;
}

/// Every repository the application talks to, plus the change bus they publish on
#[derive(Clone)]
pub struct Store {
    pub profiles: Arc<dyn ProfileRepository>,
    pub listings: Arc<dyn ListingRepository>,
    pub trades: Arc<dyn TradeRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub credentials: Arc<dyn CredentialStore>,
    pub health: Arc<dyn StoreHealth>,
    pub changes: ChangeBus,
}

impl Store {
    /// In-memory store publishing on a fresh bus
    pub fn memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new(ChangeBus::new())))
    }

    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        let changes = store.changes().clone();
        Self {
            profiles: store.clone(),
            listings: store.clone(),
            trades: store.clone(),
            messages: store.clone(),
            credentials: store.clone(),
            health: store,
            changes,
        }
    }

    /// PostgreSQL-backed store; `changes` is fed by the notification pump
    pub fn postgres(store: Arc<PgStore>, changes: ChangeBus) -> Self {
        Self {
            profiles: store.clone(),
            listings: store.clone(),
            trades: store.clone(),
            messages: store.clone(),
            credentials: store.clone(),
            health: store,
            changes,
        }
    }
}
