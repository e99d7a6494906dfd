//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;
use tokio::task::JoinHandle;

use crate::auth::AuthService;
use crate::chat::ChatService;
use crate::config::Config;
use crate::listing::{FeedHandle, FeedSynchronizer, ListingService};
use crate::profile::ProfileService;
use crate::session::SessionEvents;
use crate::storage::ObjectStore;
use crate::store::Store;
use crate::trade::NegotiationEngine;
use crate::websocket::WsState;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub auth_service: Arc<AuthService>,
    pub profile_service: Arc<ProfileService>,
    pub listing_service: Arc<ListingService>,
    pub negotiation: Arc<NegotiationEngine>,
    pub chat_service: Arc<ChatService>,
    pub feed: Arc<FeedSynchronizer>,
    pub object_store: Arc<dyn ObjectStore>,
    pub ws_state: WsState,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(config: &Config, store: Store, object_store: Arc<dyn ObjectStore>) -> Self {
        let events = SessionEvents::new();
        let auth_service = Arc::new(AuthService::new(&store, events, config));
        let profile_service = Arc::new(ProfileService::new(store.profiles.clone()));
        let listing_service = Arc::new(ListingService::new(
            store.listings.clone(),
            profile_service.provisioner().clone(),
        ));
        let negotiation = Arc::new(NegotiationEngine::new(
            store.trades.clone(),
            store.listings.clone(),
            store.profiles.clone(),
        ));
        let chat_service = Arc::new(ChatService::new(
            store.trades.clone(),
            store.messages.clone(),
            store.changes.clone(),
        ));
        let feed = Arc::new(FeedSynchronizer::new(
            store.listings.clone(),
            store.changes.clone(),
            config.feed_refresh_interval,
        ));

        Self {
            store,
            auth_service,
            profile_service,
            listing_service,
            negotiation,
            chat_service,
            feed,
            object_store,
            ws_state: WsState::new(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    /// Start the feed reload loop and the profile provisioner
    pub fn start_background(&self) -> BackgroundTasks {
        let provisioner = self
            .profile_service
            .provisioner()
            .clone()
            .spawn(self.auth_service.events());
        BackgroundTasks {
            feed: Some(self.feed.spawn()),
            provisioner: Some(provisioner),
        }
    }
}

/// Long-running tasks owned by the server. Dropping this stops them.
pub struct BackgroundTasks {
    feed: Option<FeedHandle>,
    provisioner: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub async fn shutdown(mut self) {
        if let Some(feed) = self.feed.take() {
            feed.shutdown().await;
        }
        if let Some(provisioner) = self.provisioner.take() {
            provisioner.abort();
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        if let Some(provisioner) = self.provisioner.take() {
            provisioner.abort();
        }
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_service.clone()
    }
}

impl FromRef<AppState> for Arc<FeedSynchronizer> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.feed.clone()
    }
}
