//! Profile reads and self-edits

use std::sync::Arc;

use uuid::Uuid;

use super::{Profile, ProfileError, ProfilePatch, ProfileProvisioner, UpdateProfileRequest};
use crate::session::SessionContext;
use crate::store::{ProfileRepository, StoreError};

#[derive(Clone)]
pub struct ProfileService {
    profiles: Arc<dyn ProfileRepository>,
    provisioner: ProfileProvisioner,
}

impl ProfileService {
    pub fn new(profiles: Arc<dyn ProfileRepository>) -> Self {
        let provisioner = ProfileProvisioner::new(profiles.clone());
        Self {
            profiles,
            provisioner,
        }
    }

    pub fn provisioner(&self) -> &ProfileProvisioner {
        &self.provisioner
    }

    /// The caller's own profile, provisioned if it is still missing
    pub async fn own_profile(&self, session: &SessionContext) -> Result<Profile, ProfileError> {
        self.provisioner.ensure_profile(&session.identity).await
    }

    /// Public profile by id
    pub async fn get(&self, id: Uuid) -> Result<Profile, ProfileError> {
        self.profiles.get_profile(id).await.map_err(|e| match e {
            StoreError::NotFound(_) => ProfileError::NotFound(id),
            other => other.into(),
        })
    }

    /// Replace the caller's username and avatar
    pub async fn update(
        &self,
        session: &SessionContext,
        request: UpdateProfileRequest,
    ) -> Result<Profile, ProfileError> {
        let username = request.username.trim().to_string();
        if username.is_empty() {
            return Err(ProfileError::Validation("Username is required".to_string()));
        }
        let avatar_url = request
            .avatar_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        // Editing before the first provisioning pass still works
        self.provisioner.ensure_profile(&session.identity).await?;

        let patch = ProfilePatch {
            username: Some(username),
            avatar_url: Some(avatar_url),
        };
        let profile = self
            .profiles
            .update_profile(session.user_id(), patch)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => ProfileError::UsernameTaken,
                other => other.into(),
            })?;

        tracing::info!(user_id = %profile.id, "Profile updated");
        Ok(profile)
    }
}
