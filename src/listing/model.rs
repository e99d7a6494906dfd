//! Listing models and DTOs

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

/// Most images a single listing may carry
pub const MAX_LISTING_IMAGES: usize = 4;

/// Categories offered by the listing form
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "Electronics",
    "Fashion",
    "Books",
    "Sports",
    "Home",
    "Games",
    "Other",
];

/// Item condition as shown on the listing form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "item_condition")]
pub enum Condition {
    New,
    #[serde(rename = "Like New")]
    #[sqlx(rename = "Like New")]
    LikeNew,
    Good,
    Fair,
    Poor,
}

/// Listing availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "listing_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Available, // Shown in the feed, may be offered
    Traded,    // Consumed by a completed trade
}

/// An item a user offers for trade (collection `items`)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Listing {
    pub id: Uuid,
    #[sqlx(rename = "user_id")]
    #[serde(alias = "user_id")]
    pub owner_id: Uuid,
    pub title: String,
    pub description: String,
    pub condition: Condition,
    pub category: String,
    pub estimated_value: f64,
    pub images: Vec<String>,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    pub fn is_available(&self) -> bool {
        self.status == ListingStatus::Available
    }

    /// Reject rows that break the record invariants
    pub fn check_row(&self) -> Result<(), String> {
        if !(self.estimated_value >= 0.0) || !self.estimated_value.is_finite() {
            return Err(format!(
                "listing {} has invalid estimated_value {}",
                self.id, self.estimated_value
            ));
        }
        if self.images.len() > MAX_LISTING_IMAGES {
            return Err(format!(
                "listing {} has {} images (max {})",
                self.id,
                self.images.len(),
                MAX_LISTING_IMAGES
            ));
        }
        Ok(())
    }
}

/// Insert payload for a listing
#[derive(Debug, Clone)]
pub struct NewListing {
    pub owner_id: Uuid,
    pub title: String,
    pub description: String,
    pub condition: Condition,
    pub category: String,
    pub estimated_value: f64,
    pub images: Vec<String>,
}

/// Owner fields joined onto a listing for cards and detail pages
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OwnerSummary {
    pub username: String,
    pub reputation_score: f64,
    pub trades_completed: i32,
}

/// Listing with its owner's public profile summary
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ListingWithOwner {
    #[serde(flatten)]
    pub listing: Listing,
    pub owner: Option<OwnerSummary>,
}

/// New listing form
#[derive(Debug, Deserialize, Validate)]
pub struct CreateListingRequest {
    #[validate(length(min = 1, max = 120, message = "Title is required"))]
    pub title: String,
    #[validate(length(max = 4000))]
    pub description: String,
    pub condition: Condition,
    #[validate(length(min = 1, max = 60, message = "Category is required"))]
    pub category: String,
    pub estimated_value: f64,
    #[validate(length(max = 4, message = "At most 4 images per listing"))]
    pub images: Vec<String>,
}

/// Search box and category dropdown of the browse page
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedQuery {
    pub search: Option<String>,
    pub category: Option<String>,
}
