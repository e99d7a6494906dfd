//! Lazy profile creation
//!
//! Every identity gets exactly one profile. The profile is created the first
//! time it is needed: on an auth event, or when a view finds it missing.
//! Creation is idempotent and safe to race: a conflicting insert means
//! somebody else created it first, which counts as success.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::{NewProfile, Profile, ProfileError};
use crate::models::Identity;
use crate::session::SessionEvents;
use crate::store::{ProfileRepository, StoreError};

/// Username given to a profile created on the user's behalf
pub fn default_username(identity: &Identity) -> String {
    format!("user_{}", identity.short_id())
}

/// Fallback when the short default name already belongs to someone else
fn long_username(identity: &Identity) -> String {
    format!("user_{}", identity.id.simple())
}

#[derive(Clone)]
pub struct ProfileProvisioner {
    profiles: Arc<dyn ProfileRepository>,
}

impl ProfileProvisioner {
    pub fn new(profiles: Arc<dyn ProfileRepository>) -> Self {
        Self { profiles }
    }

    /// Return the identity's profile, creating it if it does not exist yet
    pub async fn ensure_profile(&self, identity: &Identity) -> Result<Profile, ProfileError> {
        match self.profiles.get_profile(identity.id).await {
            Ok(profile) => return Ok(profile),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        for username in [default_username(identity), long_username(identity)] {
            match self
                .profiles
                .insert_profile(NewProfile::blank(identity.id, username.clone()))
                .await
            {
                Ok(profile) => {
                    tracing::info!(
                        user_id = %identity.id,
                        username = %username,
                        "Profile provisioned"
                    );
                    return Ok(profile);
                }
                Err(StoreError::Conflict(reason)) => {
                    // Lost a race for this id, or the name belongs to someone else
                    match self.profiles.get_profile(identity.id).await {
                        Ok(profile) => return Ok(profile),
                        Err(StoreError::NotFound(_)) => {
                            tracing::debug!(
                                user_id = %identity.id,
                                username = %username,
                                reason = %reason,
                                "Default username unavailable"
                            );
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ProfileError::UsernameTaken)
    }

    /// Provision a profile on every sign-in and token refresh
    pub fn spawn(self, events: &SessionEvents) -> JoinHandle<()> {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(identity) = event.identity() else {
                            continue;
                        };
                        if let Err(e) = self.ensure_profile(identity).await {
                            tracing::error!(
                                user_id = %identity.id,
                                error = %e,
                                "Profile provisioning failed"
                            );
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Profile provisioner lagged behind session events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Profile provisioner stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChangeBus, MemoryStore};
    use uuid::Uuid;

    fn identity() -> Identity {
        Identity {
            id: Uuid::parse_str("0f8fad5b-d9cb-469f-a165-70867728950e").unwrap(),
            email: "a@example.com".to_string(),
        }
    }

    #[test]
    fn test_default_username() {
        assert_eq!(default_username(&identity()), "user_0f8fad5b");
    }

    #[tokio::test]
    async fn test_existing_profile_is_returned() {
        let store = Arc::new(MemoryStore::new(ChangeBus::new()));
        store
            .insert_profile(NewProfile::blank(identity().id, "chosen"))
            .await
            .unwrap();

        let provisioner = ProfileProvisioner::new(store);
        let profile = provisioner.ensure_profile(&identity()).await.unwrap();
        assert_eq!(profile.username, "chosen");
    }

    #[tokio::test]
    async fn test_falls_back_when_default_name_is_taken() {
        let store = Arc::new(MemoryStore::new(ChangeBus::new()));
        store
            .insert_profile(NewProfile::blank(Uuid::new_v4(), "user_0f8fad5b"))
            .await
            .unwrap();

        let provisioner = ProfileProvisioner::new(store);
        let profile = provisioner.ensure_profile(&identity()).await.unwrap();
        assert_eq!(profile.username, "user_0f8fad5bd9cb469fa16570867728950e");
        assert_eq!(profile.trades_completed, 0);
        assert_eq!(profile.reputation_score, 0.0);
    }
}
