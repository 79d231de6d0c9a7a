//! Identity of the operator capturing readings.
//!
//! Authentication itself happens elsewhere; the engine only asks who is
//! signed in so records can be attributed. Nobody being signed in is legal.

use std::sync::{Arc, RwLock};

use crate::record::Author;

/// Source of the currently signed-in user.
pub trait IdentityProvider: Send + Sync + std::fmt::Debug {
    /// The signed-in user, or `None` for anonymous capture.
    fn current_user(&self) -> Option<Author>;
}

/// An identity that can be swapped at runtime, e.g. on sign-in or sign-out.
#[derive(Debug, Clone, Default)]
pub struct SharedIdentity {
    user: Arc<RwLock<Option<Author>>>,
}

impl SharedIdentity {
    /// Start with the given user, or anonymous.
    #[must_use]
    pub fn new(user: Option<Author>) -> Self {
        Self {
            user: Arc::new(RwLock::new(user)),
        }
    }

    /// Replace the signed-in user.
    pub fn set(&self, user: Option<Author>) {
        match self.user.write() {
            Ok(mut guard) => *guard = user,
            Err(poisoned) => *poisoned.into_inner() = user,
        }
    }
}

impl IdentityProvider for SharedIdentity {
    fn current_user(&self) -> Option<Author> {
        match self.user.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
