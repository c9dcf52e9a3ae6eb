//! Auth collaborator: current user identity plus a sign-in/out event stream.
//!
//! The engine never talks to an identity provider itself. The composition
//! root constructs one `AuthContext`, wires real credentials into it, and
//! hands clones to the sync coordinator and any front-end. No process-wide
//! auth singleton exists.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::error::{Error, Result};

/// Owner id for notes created while signed out. Guest notes live only in
/// the local store and are never pushed to the remote.
pub const GUEST_USER_ID: &str = "guest";

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Whether a user id is the guest sentinel (blank counts as guest).
#[must_use]
pub fn is_guest(user_id: &str) -> bool {
    let trimmed = user_id.trim();
    trimmed.is_empty() || trimmed == GUEST_USER_ID
}

/// Auth state change consumed by the sync coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { user_id: String },
    SignedOut,
}

/// Shared handle to the current user identity.
#[derive(Clone)]
pub struct AuthContext {
    user: Arc<watch::Sender<String>>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthContext {
    /// Create a signed-out context.
    #[must_use]
    pub fn new() -> Self {
        let (user, _) = watch::channel(GUEST_USER_ID.to_string());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            user: Arc::new(user),
            events,
        }
    }

    /// Create a context already signed in as `user_id`.
    pub fn signed_in(user_id: impl Into<String>) -> Result<Self> {
        let context = Self::new();
        context.sign_in(user_id)?;
        Ok(context)
    }

    /// The current owner id; `GUEST_USER_ID` when signed out.
    #[must_use]
    pub fn current_user(&self) -> String {
        self.user.borrow().clone()
    }

    /// Whether an authenticated user is active.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        !is_guest(&self.user.borrow())
    }

    /// Record a sign-in and notify subscribers.
    pub fn sign_in(&self, user_id: impl Into<String>) -> Result<()> {
        let user_id = user_id.into().trim().to_string();
        if is_guest(&user_id) {
            return Err(Error::InvalidInput(
                "Cannot sign in as the guest user".to_string(),
            ));
        }

        self.user.send_replace(user_id.clone());
        // No receivers is fine; the event is simply unobserved.
        let _ = self.events.send(AuthEvent::SignedIn { user_id });
        Ok(())
    }

    /// Record a sign-out and notify subscribers.
    pub fn sign_out(&self) {
        self.user.send_replace(GUEST_USER_ID.to_string());
        let _ = self.events.send(AuthEvent::SignedOut);
    }

    /// Subscribe to sign-in/out events. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Watch the current user id value.
    #[must_use]
    pub fn subscribe_user(&self) -> watch::Receiver<String> {
        self.user.subscribe()
    }
}

impl Default for AuthContext {
    fn default() -> Self {
        Self::new()
    }
}
