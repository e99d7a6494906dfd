//! Browse feed synchronization tests

mod common;

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use uuid::Uuid;

    use barterly_server::listing::{
        FeedQuery, FeedSynchronizer, Listing, ListingStatus, ListingWithOwner, NewListing,
    };
    use barterly_server::store::{ListingRepository, StoreResult};

    use crate::common::{wait_for, TestStore};

    fn contains(feed: &FeedSynchronizer, id: Uuid) -> bool {
        feed.snapshot().listings.iter().any(|l| l.listing.id == id)
    }

    #[tokio::test]
    async fn test_feed_converges_without_notifications() {
        let ts = TestStore::new();
        let (alice, _) = ts.user("alice").await;
        let lamp = ts.listing(&alice, "Lamp").await;

        let feed = Arc::new(FeedSynchronizer::new(
            ts.store.listings.clone(),
            ts.store.changes.clone(),
            Duration::from_millis(50),
        ));
        let handle = feed.spawn();

        assert!(wait_for(Duration::from_secs(2), || contains(&feed, lamp.id)).await);
        assert!(feed.snapshot().state.is_ready());

        // The status change is never announced; only the timer can notice it
        ts.memory
            .set_listing_status_silently(lamp.id, ListingStatus::Traded)
            .await
            .unwrap();

        assert!(wait_for(Duration::from_secs(2), || !contains(&feed, lamp.id)).await);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_feed_follows_change_notifications() {
        let ts = TestStore::new();
        let (alice, _) = ts.user("alice").await;

        // Timer far away: only the initial load and notifications drive reloads
        let feed = Arc::new(FeedSynchronizer::new(
            ts.store.listings.clone(),
            ts.store.changes.clone(),
            Duration::from_secs(3600),
        ));
        let mut updates = feed.watch();
        let handle = feed.spawn();
        assert!(wait_for(Duration::from_secs(2), || feed.snapshot().state.is_ready()).await);

        let chair = ts.listing(&alice, "Chair").await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while !updates.borrow_and_update().listings.iter().any(|l| l.listing.id == chair.id) {
                updates.changed().await.unwrap();
            }
        })
        .await
        .expect("feed did not pick up the new listing");

        let snapshot = feed.snapshot();
        assert_eq!(snapshot.listings[0].owner.as_ref().unwrap().username, "alice");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_releases_subscription() {
        let ts = TestStore::new();
        let feed = Arc::new(FeedSynchronizer::new(
            ts.store.listings.clone(),
            ts.store.changes.clone(),
            Duration::from_secs(3600),
        ));

        let handle = feed.spawn();
        assert_eq!(ts.store.changes.subscriber_count(), 1);
        handle.shutdown().await;
        assert_eq!(ts.store.changes.subscriber_count(), 0);

        let handle = feed.spawn();
        drop(handle);
        assert!(
            wait_for(Duration::from_secs(1), || ts.store.changes.subscriber_count() == 0).await
        );
    }

    /// Reads the inner store right away, then holds the result back
    struct DelayedListings {
        inner: Arc<dyn ListingRepository>,
        delays: Mutex<VecDeque<Duration>>,
    }

    #[async_trait]
    impl ListingRepository for DelayedListings {
        async fn insert_listing(&self, listing: NewListing) -> StoreResult<Listing> {
            self.inner.insert_listing(listing).await
        }

        async fn get_listing(&self, id: Uuid) -> StoreResult<ListingWithOwner> {
            self.inner.get_listing(id).await
        }

        async fn list_available(&self) -> StoreResult<Vec<ListingWithOwner>> {
            let result = self.inner.list_available().await;
            let delay = self.delays.lock().unwrap().pop_front().unwrap_or_default();
            tokio::time::sleep(delay).await;
            result
        }

        async fn list_by_owner(
            &self,
            owner_id: Uuid,
            status: Option<ListingStatus>,
        ) -> StoreResult<Vec<Listing>> {
            self.inner.list_by_owner(owner_id, status).await
        }

        async fn get_listings(&self, ids: &[Uuid]) -> StoreResult<Vec<Listing>> {
            self.inner.get_listings(ids).await
        }
    }

    #[tokio::test]
    async fn test_stale_reload_is_discarded() {
        let ts = TestStore::new();
        let (alice, _) = ts.user("alice").await;
        let lamp = ts.listing(&alice, "Lamp").await;

        let listings = Arc::new(DelayedListings {
            inner: ts.store.listings.clone(),
            delays: Mutex::new(VecDeque::from([Duration::from_millis(200)])),
        });
        let feed = FeedSynchronizer::new(
            listings,
            ts.store.changes.clone(),
            Duration::from_secs(3600),
        );

        let (slow, fast) = tokio::join!(feed.reload_snapshot(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let chair = ts.listing(&alice, "Chair").await;
            (feed.reload_snapshot().await, chair)
        });
        let (fast, chair) = fast;

        assert!(fast);
        assert!(!slow, "older reload must not overwrite a newer one");
        let snapshot = feed.snapshot();
        assert_eq!(snapshot.generation, 2);
        assert!(contains(&feed, chair.id));
        assert!(contains(&feed, lamp.id));
    }

    #[tokio::test]
    async fn test_views_filter_the_snapshot() {
        let ts = TestStore::new();
        let (alice, _) = ts.user("alice").await;
        let chair = ts.listing_in(&alice, "Oak Chair", "Furniture").await;
        ts.listing_in(&alice, "Desk", "Furniture").await;
        ts.listing_in(&alice, "Guitar", "Music").await;

        let feed = FeedSynchronizer::new(
            ts.store.listings.clone(),
            ts.store.changes.clone(),
            Duration::from_secs(3600),
        );
        assert!(feed.reload_snapshot().await);

        let view = feed.view(&FeedQuery {
            search: Some("chair".to_string()),
            category: None,
        });
        assert_eq!(view.listings.len(), 1);
        assert_eq!(view.listings[0].listing.id, chair.id);
        assert_eq!(view.categories, vec!["Furniture".to_string(), "Music".to_string()]);

        let view = feed.view(&FeedQuery {
            search: None,
            category: Some("Music".to_string()),
        });
        assert_eq!(view.listings.len(), 1);
        assert_eq!(view.listings[0].listing.title, "Guitar");

        assert_eq!(feed.view(&FeedQuery::default()).listings.len(), 3);
    }
}
