//! Unsubscribe handles.

use std::fmt;

/// Keeps a callback registered until dropped.
///
/// Dropping the handle, or calling [`Subscription::unsubscribe`], removes
/// the callback. [`Subscription::detach`] keeps it registered for the life
/// of its source.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a handle that runs `cancel` when released.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel.
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Unsubscribes now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Leaves the callback registered and discards the handle.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
