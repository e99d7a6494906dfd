//! User profiles: reputation, statistics and lazy provisioning

mod model;
mod provisioner;
mod service;

pub use model::*;
pub use provisioner::{default_username, ProfileProvisioner};
pub use service::ProfileService;

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Profile errors
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Profile not found: {0}")]
    NotFound(Uuid),

    #[error("Username is already taken")]
    UsernameTaken,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
