//! Trade chat: message log, live channels and sending

mod channel;
mod model;
mod service;

pub use channel::{ChannelUpdate, MessageChannel};
pub use model::*;
pub use service::{ChatService, MAX_MESSAGE_CHARS};

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Chat errors
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Only trade participants can use this chat")]
    Forbidden,

    #[error("Trade not found: {0}")]
    TradeNotFound(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
