//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use barterly_server::config::Config;
use barterly_server::listing::{Condition, Listing, NewListing};
use barterly_server::models::Identity;
use barterly_server::profile::{NewProfile, Profile};
use barterly_server::session::SessionContext;
use barterly_server::store::{ChangeBus, MemoryStore, Store};

/// In-memory store plus direct access to its test hooks
pub struct TestStore {
    pub memory: Arc<MemoryStore>,
    pub store: Store,
}

impl TestStore {
    pub fn new() -> Self {
        let memory = Arc::new(MemoryStore::new(ChangeBus::new()));
        let store = Store::from_memory(memory.clone());
        Self { memory, store }
    }

    /// A signed-in user with a profile
    pub async fn user(&self, username: &str) -> (SessionContext, Profile) {
        let identity = Identity {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", username),
        };
        let profile = self
            .store
            .profiles
            .insert_profile(NewProfile::blank(identity.id, username))
            .await
            .unwrap();
        (session_for(identity), profile)
    }

    pub async fn listing(&self, owner: &SessionContext, title: &str) -> Listing {
        self.listing_in(owner, title, "Furniture").await
    }

    pub async fn listing_in(&self, owner: &SessionContext, title: &str, category: &str) -> Listing {
        self.store
            .listings
            .insert_listing(NewListing {
                owner_id: owner.user_id(),
                title: title.to_string(),
                description: format!("A well kept {}", title.to_lowercase()),
                condition: Condition::Good,
                category: category.to_string(),
                estimated_value: 40.0,
                images: vec![format!("https://img.example.com/{}.jpg", Uuid::new_v4())],
            })
            .await
            .unwrap()
    }
}

pub fn session_for(identity: Identity) -> SessionContext {
    SessionContext::new(identity, Uuid::new_v4().to_string())
}

/// Identity without a profile yet
pub fn fresh_identity() -> Identity {
    Identity {
        id: Uuid::new_v4(),
        email: format!("{}@example.com", Uuid::new_v4().simple()),
    }
}

/// Config with cheap hashing and a fast feed timer
pub fn test_config() -> Config {
    Config {
        bcrypt_cost: 4,
        feed_refresh_interval: Duration::from_millis(50),
        max_upload_bytes: 1024,
        ..Config::default()
    }
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_for<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
