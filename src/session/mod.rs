//! Session context and auth state events
//!
//! Every authenticated operation receives an explicit [`SessionContext`]
//! instead of reading a process-wide current user. Changes to a session are
//! announced on [`SessionEvents`] so that background reactions (such as
//! profile provisioning) can subscribe to them.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::Identity;

const SESSION_EVENTS_CAPACITY: usize = 64;

/// The authenticated caller of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub identity: Identity,
    /// Token id of the session the caller authenticated with
    pub session_id: String,
}

impl SessionContext {
    pub fn new(identity: Identity, session_id: impl Into<String>) -> Self {
        Self {
            identity,
            session_id: session_id.into(),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.identity.id
    }
}

/// Auth state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Identity),
    TokenRefreshed(Identity),
    SignedOut(Uuid),
}

impl SessionEvent {
    /// Identity carried by events that establish a session
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionEvent::SignedIn(identity) | SessionEvent::TokenRefreshed(identity) => {
                Some(identity)
            }
            SessionEvent::SignedOut(_) => None,
        }
    }
}

/// Broadcast hub for auth state changes
#[derive(Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEvents {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(SESSION_EVENTS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}
