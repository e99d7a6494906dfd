//! Listings: creation, lookups and the browse feed

mod feed;
mod model;
mod service;

pub use feed::{categories, FeedFilter, FeedHandle, FeedSnapshot, FeedSynchronizer, FeedView};
pub use model::*;
pub use service::ListingService;

use thiserror::Error;
use uuid::Uuid;

use crate::profile::ProfileError;
use crate::store::StoreError;

/// Listing errors
#[derive(Error, Debug)]
pub enum ListingError {
    #[error("Listing not found: {0}")]
    NotFound(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
