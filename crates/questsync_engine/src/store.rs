//! Document store abstraction.
//!
//! The engine layers its policy on top of a store offering three
//! primitives against one authoritative document per user: `get`, a
//! merge-capable `set`, and `subscribe`.

use crate::error::StoreError;
use crate::subscription::Subscription;
use async_trait::async_trait;
use questsync_codec::Value;
use std::fmt;
use std::sync::Arc;

/// Callback receiving the document (or `None` when it does not exist) on
/// every server-visible change, including the subscriber's own writes.
pub type SnapshotListener = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Path of a document in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocPath(String);

impl DocPath {
    /// Creates a path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The path as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Template producing a user's document path from their uid.
///
/// Every occurrence of `{uid}` is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocPathTemplate(String);

impl DocPathTemplate {
    /// The placeholder substituted with the uid.
    pub const UID_PLACEHOLDER: &'static str = "{uid}";

    /// Creates a template.
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// Resolves the template for `uid`.
    pub fn resolve(&self, uid: &str) -> DocPath {
        DocPath(self.0.replace(Self::UID_PLACEHOLDER, uid))
    }

    /// The raw template.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocPathTemplate {
    fn default() -> Self {
        Self::new("users/{uid}/app/state")
    }
}

/// Options for [`DocumentStore::set`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Merge top-level fields into the existing document instead of
    /// replacing it.
    pub merge: bool,
    /// Field the store fills with its own write timestamp.
    pub server_timestamp: Option<String>,
}

impl SetOptions {
    /// Options for a merging write.
    pub fn merge() -> Self {
        Self {
            merge: true,
            server_timestamp: None,
        }
    }

    /// Asks the store to stamp `field` with the server time.
    pub fn with_server_timestamp(mut self, field: impl Into<String>) -> Self {
        self.server_timestamp = Some(field.into());
        self
    }
}

/// A remote document store.
///
/// Implementations must be usable from any thread. Listeners may be called
/// from inside `set` or from a background task; they must not be called
/// while the store holds a lock the listener could need.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a document.
    async fn get(&self, path: &DocPath) -> Result<Option<Value>, StoreError>;

    /// Writes a document.
    async fn set(&self, path: &DocPath, value: Value, options: SetOptions)
        -> Result<(), StoreError>;

    /// Registers a listener for a document. The listener stays registered
    /// until the returned handle is released.
    fn subscribe(&self, path: &DocPath, listener: SnapshotListener) -> Subscription;

    /// Whether the store has credentials and an endpoint. An unconfigured
    /// store disables sync for the life of the engine.
    fn is_configured(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_resolution() {
        let template = DocPathTemplate::default();
        assert_eq!(template.resolve("u1").as_str(), "users/u1/app/state");

        let custom = DocPathTemplate::new("tenants/{uid}/{uid}");
        assert_eq!(custom.resolve("x").to_string(), "tenants/x/x");
    }

    #[test]
    fn set_options() {
        let opts = SetOptions::merge().with_server_timestamp("updatedAt");
        assert!(opts.merge);
        assert_eq!(opts.server_timestamp.as_deref(), Some("updatedAt"));
        assert!(!SetOptions::default().merge);
    }
}
