//! Browse feed synchronization
//!
//! The feed holds one snapshot of every available listing. The snapshot is
//! rebuilt from the store by [`FeedSynchronizer::reload_snapshot`], which is
//! driven both by change notifications on `items` and by a fixed polling
//! interval, so the feed converges even when a notification is lost.
//!
//! Reloads may overlap. Each reload takes a ticket before it reads the store
//! and only applies its result if no later ticket has been applied already.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{FeedQuery, Listing, ListingWithOwner};
use crate::models::LoadState;
use crate::store::{ChangeBus, Collection, ListingRepository, Notification, Subscription};

/// Current contents of the feed
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    /// Ticket of the reload that produced this snapshot
    pub generation: u64,
    pub state: LoadState,
    /// Available listings, newest first
    pub listings: Vec<ListingWithOwner>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Search box and category dropdown applied to a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter {
    needle: Option<String>,
    category: Option<String>,
}

impl FeedFilter {
    pub fn new(query: &FeedQuery) -> Self {
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let category = query
            .category
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self { needle, category }
    }

    /// Case-insensitive substring on title or description, exact category
    pub fn matches(&self, listing: &Listing) -> bool {
        if let Some(category) = &self.category {
            if listing.category != *category {
                return false;
            }
        }
        match &self.needle {
            Some(needle) => {
                listing.title.to_lowercase().contains(needle)
                    || listing.description.to_lowercase().contains(needle)
            }
            None => true,
        }
    }

    pub fn apply(&self, listings: &[ListingWithOwner]) -> Vec<ListingWithOwner> {
        listings
            .iter()
            .filter(|l| self.matches(&l.listing))
            .cloned()
            .collect()
    }
}

/// What the browse page renders
#[derive(Debug, Clone, Serialize)]
pub struct FeedView {
    #[serde(flatten)]
    pub state: LoadState,
    pub generation: u64,
    pub listings: Vec<ListingWithOwner>,
    pub categories: Vec<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Distinct categories of a snapshot, sorted
pub fn categories(listings: &[ListingWithOwner]) -> Vec<String> {
    listings
        .iter()
        .map(|l| l.listing.category.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub struct FeedSynchronizer {
    listings: Arc<dyn ListingRepository>,
    changes: ChangeBus,
    interval: Duration,
    tickets: AtomicU64,
    snapshot: watch::Sender<FeedSnapshot>,
}

impl FeedSynchronizer {
    pub fn new(
        listings: Arc<dyn ListingRepository>,
        changes: ChangeBus,
        interval: Duration,
    ) -> Self {
        let (snapshot, _rx) = watch::channel(FeedSnapshot::default());
        Self {
            listings,
            changes,
            interval,
            tickets: AtomicU64::new(0),
            snapshot,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified every time a reload is applied
    pub fn watch(&self) -> watch::Receiver<FeedSnapshot> {
        self.snapshot.subscribe()
    }

    /// Re-read every available listing and replace the snapshot.
    ///
    /// Returns false when a newer reload was applied while this one was in
    /// flight, in which case its result is discarded.
    pub async fn reload_snapshot(&self) -> bool {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;

        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.state == LoadState::Idle {
                snapshot.state = LoadState::Loading;
                true
            } else {
                false
            }
        });

        let result = self.listings.list_available().await;

        self.snapshot.send_if_modified(|snapshot| {
            if ticket <= snapshot.generation {
                tracing::debug!(
                    ticket,
                    applied = snapshot.generation,
                    "Discarding stale feed reload"
                );
                return false;
            }
            snapshot.generation = ticket;
            match result {
                Ok(listings) => {
                    let mut seen = HashSet::with_capacity(listings.len());
                    snapshot.listings = listings
                        .into_iter()
                        .filter(|l| seen.insert(l.listing.id))
                        .collect();
                    snapshot.state = LoadState::Ready;
                    snapshot.refreshed_at = Some(Utc::now());
                    tracing::debug!(ticket, count = snapshot.listings.len(), "Feed reloaded");
                }
                Err(e) => {
                    // Keep showing the last good listings next to the error
                    tracing::warn!(ticket, error = %e, "Feed reload failed");
                    snapshot.state = LoadState::failed(e.to_string());
                }
            }
            true
        })
    }

    /// Filtered view of the current snapshot
    pub fn view(&self, query: &FeedQuery) -> FeedView {
        let filter = FeedFilter::new(query);
        let snapshot = self.snapshot.borrow();
        FeedView {
            state: snapshot.state.clone(),
            generation: snapshot.generation,
            listings: filter.apply(&snapshot.listings),
            categories: categories(&snapshot.listings),
            refreshed_at: snapshot.refreshed_at,
        }
    }

    pub fn categories(&self) -> Vec<String> {
        categories(&self.snapshot.borrow().listings)
    }

    /// Start the reload loop: an immediate load, then one per change
    /// notification and one per interval tick.
    pub fn spawn(self: &Arc<Self>) -> FeedHandle {
        let feed = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let mut subscription = Some(self.changes.subscribe(Collection::Items, None));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(feed.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        feed.reload_snapshot().await;
                    }
                    notification = next_change(&mut subscription) => match notification {
                        Some(Notification::Change(event)) => {
                            tracing::trace!(kind = ?event.kind, "Listing change");
                            feed.reload_snapshot().await;
                        }
                        Some(Notification::Missed(_)) => {
                            feed.reload_snapshot().await;
                        }
                        None => {
                            tracing::warn!("Change bus closed, feed falls back to polling");
                            subscription = None;
                        }
                    },
                }
            }

            if let Some(subscription) = subscription {
                subscription.unsubscribe();
            }
            tracing::debug!("Feed synchronizer stopped");
        });

        FeedHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

async fn next_change(subscription: &mut Option<Subscription>) -> Option<Notification> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

/// Running reload loop. Dropping the handle stops it.
pub struct FeedHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl FeedHandle {
    /// Stop the loop and wait for it to release its subscription
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Feed task ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
