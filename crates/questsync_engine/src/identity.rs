//! Identity provider abstraction.

use crate::error::AuthError;
use crate::subscription::Subscription;
use async_trait::async_trait;
use std::sync::Arc;

/// The signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Stable user id. Selects the remote document.
    pub uid: String,
    /// Display name.
    pub display_name: Option<String>,
    /// Avatar URL.
    pub photo_url: Option<String>,
    /// Email address.
    pub email: Option<String>,
}

impl UserInfo {
    /// Creates a user with only a uid.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
            photo_url: None,
            email: None,
        }
    }

    /// Sets the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the avatar URL.
    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }
}

/// Callback receiving the new user, or `None` after sign-out.
pub type IdentityListener = Arc<dyn Fn(Option<UserInfo>) + Send + Sync>;

/// Supplies sign-in, sign-out and identity change events.
///
/// Sign-in methods report success once the flow completes. The new identity
/// is delivered separately through the identity listener.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Registers an identity listener. Providers typically deliver the
    /// current identity right away.
    fn on_identity_change(&self, listener: IdentityListener) -> Subscription;

    /// Popup-style interactive sign-in.
    async fn sign_in_interactive(&self) -> Result<(), AuthError>;

    /// Redirect-style sign-in, for contexts where popups are unreliable.
    async fn sign_in_redirect(&self) -> Result<(), AuthError>;

    /// Signs the current user out.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Whether the provider has credentials configured.
    fn is_configured(&self) -> bool {
        true
    }
}
