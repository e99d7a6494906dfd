//! PostgreSQL structured store
//!
//! Row triggers installed by the migrations publish every write on the
//! `row_changes` channel; [`spawn_change_pump`] forwards them to a
//! [`ChangeBus`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::{PgListener, PgPool};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{
    checked, ChangeBus, ChangeEvent, ChangeKind, Collection, CredentialStore, ListingRepository,
    MessageRepository, ProfileRepository, StoreError, StoreHealth, StoreResult, TradeRepository,
};
use crate::chat::{Message, NewMessage};
use crate::listing::{
    Condition, Listing, ListingStatus, ListingWithOwner, NewListing, OwnerSummary,
};
use crate::models::{Account, AuthSession, NewAuthSession};
use crate::profile::{NewProfile, Profile, ProfilePatch};
use crate::trade::{NewTrade, Trade, TradeSide};

/// Notification channel the row triggers publish on
pub const CHANGE_CHANNEL: &str = "row_changes";

const UNIQUE_VIOLATION: &str = "23505";

const PROFILE_COLUMNS: &str =
    "id, username, avatar_url, reputation_score, trades_completed, created_at, updated_at";

const LISTING_COLUMNS: &str =
    "id, user_id, title, description, condition, category, estimated_value, images, status, created_at";

const TRADE_COLUMNS: &str =
    "id, requester_id, receiver_id, requester_items, receiver_items, status, created_at, updated_at";

const SESSION_COLUMNS: &str =
    "id, user_id, jti, refresh_token_hash, expires_at, revoked, revoked_at, created_at, updated_at";

fn map_sqlx(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict(db.constraint().unwrap_or("unique").to_string())
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Malformed(e.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

/// Listing joined with its owner's profile (LEFT JOIN, owner may be missing)
#[derive(sqlx::FromRow)]
struct ListingOwnerRow {
    id: Uuid,
    user_id: Uuid,
    title: String,
    description: String,
    condition: Condition,
    category: String,
    estimated_value: f64,
    images: Vec<String>,
    status: ListingStatus,
    created_at: DateTime<Utc>,
    owner_username: Option<String>,
    owner_reputation_score: Option<f64>,
    owner_trades_completed: Option<i32>,
}

impl ListingOwnerRow {
    fn into_listing(self) -> StoreResult<ListingWithOwner> {
        let owner = match (
            self.owner_username,
            self.owner_reputation_score,
            self.owner_trades_completed,
        ) {
            (Some(username), Some(reputation_score), Some(trades_completed)) => {
                Some(OwnerSummary {
                    username,
                    reputation_score,
                    trades_completed,
                })
            }
            _ => None,
        };
        let listing = Listing {
            id: self.id,
            owner_id: self.user_id,
            title: self.title,
            description: self.description,
            condition: self.condition,
            category: self.category,
            estimated_value: self.estimated_value,
            images: self.images,
            status: self.status,
            created_at: self.created_at,
        };
        Ok(ListingWithOwner {
            listing: checked(listing, Listing::check_row)?,
            owner,
        })
    }
}

const LISTING_WITH_OWNER_SELECT: &str = r#"
    SELECT i.id, i.user_id, i.title, i.description, i.condition, i.category,
           i.estimated_value, i.images, i.status, i.created_at,
           p.username AS owner_username,
           p.reputation_score AS owner_reputation_score,
           p.trades_completed AS owner_trades_completed
    FROM items i
    LEFT JOIN profiles p ON p.id = i.user_id
"#;

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ProfileRepository for PgStore {
    async fn get_profile(&self, id: Uuid) -> StoreResult<Profile> {
        let profile: Option<Profile> =
            sqlx::query_as(&format!("SELECT {} FROM profiles WHERE id = $1", PROFILE_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;

        let profile = profile.ok_or_else(|| StoreError::NotFound(format!("profile {}", id)))?;
        checked(profile, Profile::check_row)
    }

    async fn find_profile_by_username(&self, username: &str) -> StoreResult<Option<Profile>> {
        sqlx::query_as(&format!(
            "SELECT {} FROM profiles WHERE username = $1",
            PROFILE_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn insert_profile(&self, profile: NewProfile) -> StoreResult<Profile> {
        sqlx::query_as(&format!(
            r#"
            INSERT INTO profiles (id, username, avatar_url)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(profile.id)
        .bind(&profile.username)
        .bind(&profile.avatar_url)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn update_profile(&self, id: Uuid, patch: ProfilePatch) -> StoreResult<Profile> {
        let (set_avatar, avatar_url) = match patch.avatar_url {
            Some(url) => (true, url),
            None => (false, None),
        };

        let profile: Option<Profile> = sqlx::query_as(&format!(
            r#"
            UPDATE profiles
            SET username = COALESCE($2, username),
                avatar_url = CASE WHEN $3 THEN $4 ELSE avatar_url END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(id)
        .bind(&patch.username)
        .bind(set_avatar)
        .bind(&avatar_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        profile.ok_or_else(|| StoreError::NotFound(format!("profile {}", id)))
    }
}

#[async_trait]
impl ListingRepository for PgStore {
    async fn insert_listing(&self, listing: NewListing) -> StoreResult<Listing> {
        let listing: Listing = sqlx::query_as(&format!(
            r#"
            INSERT INTO items (id, user_id, title, description, condition, category,
                               estimated_value, images)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            LISTING_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(listing.owner_id)
        .bind(&listing.title)
        .bind(&listing.description)
        .bind(listing.condition)
        .bind(&listing.category)
        .bind(listing.estimated_value)
        .bind(&listing.images)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        checked(listing, Listing::check_row)
    }

    async fn get_listing(&self, id: Uuid) -> StoreResult<ListingWithOwner> {
        let row: Option<ListingOwnerRow> =
            sqlx::query_as(&format!("{} WHERE i.id = $1", LISTING_WITH_OWNER_SELECT))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;

        row.ok_or_else(|| StoreError::NotFound(format!("listing {}", id)))?
            .into_listing()
    }

    async fn list_available(&self) -> StoreResult<Vec<ListingWithOwner>> {
        let rows: Vec<ListingOwnerRow> = sqlx::query_as(&format!(
            "{} WHERE i.status = 'available' ORDER BY i.created_at DESC",
            LISTING_WITH_OWNER_SELECT
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter().map(ListingOwnerRow::into_listing).collect()
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        status: Option<ListingStatus>,
    ) -> StoreResult<Vec<Listing>> {
        let listings: Vec<Listing> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM items
            WHERE user_id = $1 AND ($2::listing_status IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#,
            LISTING_COLUMNS
        ))
        .bind(owner_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        listings
            .into_iter()
            .map(|l| checked(l, Listing::check_row))
            .collect()
    }

    async fn get_listings(&self, ids: &[Uuid]) -> StoreResult<Vec<Listing>> {
        let listings: Vec<Listing> = sqlx::query_as(&format!(
            "SELECT {} FROM items WHERE id = ANY($1)",
            LISTING_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        listings
            .into_iter()
            .map(|l| checked(l, Listing::check_row))
            .collect()
    }
}

#[async_trait]
impl TradeRepository for PgStore {
    async fn insert_trade(&self, trade: NewTrade) -> StoreResult<Trade> {
        let trade: Trade = sqlx::query_as(&format!(
            r#"
            INSERT INTO trade_requests (id, requester_id, receiver_id, requester_items, receiver_items)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            TRADE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(trade.requester_id)
        .bind(trade.receiver_id)
        .bind(&trade.requester_items)
        .bind(&trade.receiver_items)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        checked(trade, Trade::check_row)
    }

    async fn get_trade(&self, id: Uuid) -> StoreResult<Trade> {
        let trade: Option<Trade> = sqlx::query_as(&format!(
            "SELECT {} FROM trade_requests WHERE id = $1",
            TRADE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let trade = trade.ok_or_else(|| StoreError::NotFound(format!("trade {}", id)))?;
        checked(trade, Trade::check_row)
    }

    async fn list_trades(&self, user_id: Uuid, side: TradeSide) -> StoreResult<Vec<Trade>> {
        let column = match side {
            TradeSide::Received => "receiver_id",
            TradeSide::Sent => "requester_id",
        };
        let trades: Vec<Trade> = sqlx::query_as(&format!(
            "SELECT {} FROM trade_requests WHERE {} = $1 ORDER BY created_at DESC",
            TRADE_COLUMNS, column
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

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
        let trade: Option<Trade> = sqlx::query_as(&format!(
            r#"
            UPDATE trade_requests
            SET status = 'rejected', updated_at = $3
            WHERE id = $1 AND receiver_id = $2 AND status = 'pending'
            RETURNING {}
            "#,
            TRADE_COLUMNS
        ))
        .bind(id)
        .bind(receiver_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        match trade {
            Some(trade) => Ok(trade),
            None => Err(self.missed_transition(id, receiver_id).await),
        }
    }

    async fn complete_trade(
        &self,
        id: Uuid,
        receiver_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Trade> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let trade: Option<Trade> = sqlx::query_as(&format!(
            r#"
            UPDATE trade_requests
            SET status = 'completed', updated_at = $3
            WHERE id = $1 AND receiver_id = $2 AND status = 'pending'
            RETURNING {}
            "#,
            TRADE_COLUMNS
        ))
        .bind(id)
        .bind(receiver_id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let trade = match trade {
            Some(trade) => trade,
            None => {
                tx.rollback().await.map_err(map_sqlx)?;
                return Err(self.missed_transition(id, receiver_id).await);
            }
        };

        let mut involved = trade.involved_items();
        involved.sort();
        involved.dedup();

        let consumed = sqlx::query(
            r#"
            UPDATE items
            SET status = 'traded'
            WHERE id = ANY($1) AND status = 'available'
            "#,
        )
        .bind(&involved)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?
        .rows_affected();

        // Dropping the transaction without commit rolls the status change back
        if consumed != involved.len() as u64 {
            tracing::warn!(
                trade_id = %id,
                expected = involved.len(),
                consumed,
                "Trade listings no longer available"
            );
            return Err(StoreError::Conflict(format!(
                "trade {} involves listings that are no longer available",
                id
            )));
        }

        sqlx::query(
            r#"
            UPDATE profiles
            SET trades_completed = trades_completed + 1, updated_at = $2
            WHERE id = ANY($1)
            "#,
        )
        .bind(vec![trade.requester_id, trade.receiver_id])
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;

        checked(trade, Trade::check_row)
    }
}

impl PgStore {
    /// Why a guarded status update matched no row
    async fn missed_transition(&self, id: Uuid, receiver_id: Uuid) -> StoreError {
        let current: Result<Option<(crate::trade::TradeStatus,)>, _> = sqlx::query_as(
            "SELECT status FROM trade_requests WHERE id = $1 AND receiver_id = $2",
        )
        .bind(id)
        .bind(receiver_id)
        .fetch_optional(&self.pool)
        .await;

        match current {
            Ok(Some((status,))) => {
                StoreError::Conflict(format!("trade {} is already {}", id, status.as_str()))
            }
            Ok(None) => StoreError::NotFound(format!("trade {}", id)),
            Err(e) => map_sqlx(e),
        }
    }
}

#[async_trait]
impl MessageRepository for PgStore {
    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        sqlx::query_as(
            r#"
            INSERT INTO messages (id, trade_id, sender_id, content)
            VALUES ($1, $2, $3, $4)
            RETURNING id, trade_id, sender_id, content, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.trade_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn list_messages(&self, trade_id: Uuid) -> StoreResult<Vec<Message>> {
        sqlx::query_as(
            r#"
            SELECT id, trade_id, sender_id, content, created_at
            FROM messages
            WHERE trade_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(trade_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn create_account(&self, email: &str, password_hash: &str) -> StoreResult<Account> {
        sqlx::query_as(
            r#"
            INSERT INTO auth_accounts (id, email, password_hash)
            VALUES ($1, LOWER($2), $3)
            RETURNING id, email, password_hash, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        sqlx::query_as(
            r#"
            SELECT id, email, password_hash, created_at
            FROM auth_accounts
            WHERE email = LOWER($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn get_account(&self, id: Uuid) -> StoreResult<Account> {
        let account: Option<Account> = sqlx::query_as(
            "SELECT id, email, password_hash, created_at FROM auth_accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        account.ok_or_else(|| StoreError::NotFound(format!("account {}", id)))
    }

    async fn insert_session(&self, session: NewAuthSession) -> StoreResult<AuthSession> {
        sqlx::query_as(&format!(
            r#"
            INSERT INTO auth_sessions (id, user_id, jti, refresh_token_hash, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(session.user_id)
        .bind(&session.jti)
        .bind(&session.refresh_token_hash)
        .bind(session.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn find_active_session(&self, jti: &str) -> StoreResult<Option<AuthSession>> {
        sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM auth_sessions
            WHERE jti = $1 AND revoked = FALSE AND expires_at > NOW()
            "#,
            SESSION_COLUMNS
        ))
        .bind(jti)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn find_session_by_refresh_hash(
        &self,
        hash: &str,
    ) -> StoreResult<Option<AuthSession>> {
        sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM auth_sessions
            WHERE refresh_token_hash = $1 AND revoked = FALSE AND expires_at > NOW()
            "#,
            SESSION_COLUMNS
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn rotate_session(
        &self,
        session_id: Uuid,
        jti: &str,
        refresh_token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let rows = sqlx::query(
            r#"
            UPDATE auth_sessions
            SET jti = $2, refresh_token_hash = $3, expires_at = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .bind(jti)
        .bind(refresh_token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::NotFound(format!("session {}", session_id)));
        }
        Ok(())
    }

    async fn revoke_session(&self, jti: &str) -> StoreResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE auth_sessions
            SET revoked = TRUE, revoked_at = NOW(), updated_at = NOW()
            WHERE jti = $1 AND revoked = FALSE
            "#,
        )
        .bind(jti)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?
        .rows_affected();

        Ok(rows > 0)
    }
}

#[async_trait]
impl StoreHealth for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

// ============================================================================
// Change pump
// ============================================================================

/// Payload published by the `notify_row_change` trigger.
///
/// Rows too large for a notification arrive without `row`; the pump re-reads
/// them by id.
#[derive(Debug, Deserialize)]
struct RowNotification {
    collection: Collection,
    kind: ChangeKind,
    id: Uuid,
    row: Option<Value>,
}

async fn load_row(pool: &PgPool, collection: Collection, id: Uuid) -> Result<Value, sqlx::Error> {
    // Table names come from a closed enum
    let (row,): (Value,) = sqlx::query_as(&format!(
        "SELECT row_to_json(t)::jsonb FROM {} t WHERE t.id = $1",
        collection.as_str()
    ))
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

async fn forward_notification(pool: &PgPool, bus: &ChangeBus, payload: &str) {
    let notification: RowNotification = match serde_json::from_str(payload) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping unparseable change notification");
            return;
        }
    };

    let row = match notification.row {
        Some(row) => row,
        None => match load_row(pool, notification.collection, notification.id).await {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(
                    collection = notification.collection.as_str(),
                    id = %notification.id,
                    error = %e,
                    "Failed to load changed row"
                );
                return;
            }
        },
    };

    bus.publish(ChangeEvent {
        collection: notification.collection,
        kind: notification.kind,
        row,
    });
}

/// Forward trigger notifications from PostgreSQL to `bus` until the task is aborted
pub async fn spawn_change_pump(pool: PgPool, bus: ChangeBus) -> StoreResult<JoinHandle<()>> {
    let mut listener = PgListener::connect_with(&pool).await.map_err(map_sqlx)?;
    listener.listen(CHANGE_CHANNEL).await.map_err(map_sqlx)?;
    tracing::info!(channel = CHANGE_CHANNEL, "Listening for row changes");

    Ok(tokio::spawn(async move {
        loop {
            match listener.try_recv().await {
                Ok(Some(notification)) => {
                    forward_notification(&pool, &bus, notification.payload()).await;
                }
                Ok(None) => {
                    // Connection dropped; the listener reconnects on the next call
                    tracing::warn!(
                        "Change listener lost its connection, notifications may be missed"
                    );
                }
                Err(e) => {
                    tracing::error!("Change listener error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_notification_without_row() {
        let n: RowNotification = serde_json::from_str(
            r#"{"collection":"messages","kind":"INSERT","id":"0f8fad5b-d9cb-469f-a165-70867728950e","row":null}"#,
        )
        .unwrap();
        assert_eq!(n.collection, Collection::Messages);
        assert_eq!(n.kind, ChangeKind::Insert);
        assert!(n.row.is_none());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        assert!(map_sqlx(sqlx::Error::RowNotFound).is_not_found());
    }
}
