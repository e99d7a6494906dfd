//! Profile records and DTOs

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

/// Per-user reputation and statistics record, keyed 1:1 by identity id
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub reputation_score: f64,
    pub trades_completed: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Reject rows that break the record invariants
    pub fn check_row(&self) -> Result<(), String> {
        if self.username.trim().is_empty() {
            return Err(format!("profile {} has an empty username", self.id));
        }
        if !(self.reputation_score >= 0.0) {
            return Err(format!(
                "profile {} has invalid reputation {}",
                self.id, self.reputation_score
            ));
        }
        if self.trades_completed < 0 {
            return Err(format!(
                "profile {} has negative trades_completed",
                self.id
            ));
        }
        Ok(())
    }
}

/// Insert payload for a profile
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl NewProfile {
    /// Profile with zeroed statistics and no avatar
    pub fn blank(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            avatar_url: None,
        }
    }
}

/// Self-edit of a profile
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub username: Option<String>,
    pub avatar_url: Option<Option<String>>,
}

/// Profile edit form
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 40, message = "Username is required"))]
    pub username: String,
    #[validate(url)]
    pub avatar_url: Option<String>,
}
