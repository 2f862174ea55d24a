//! Configuration for the sync engine.

use crate::backoff::BackoffPolicy;
use crate::store::DocPathTemplate;
use std::time::Duration;

/// Default delay between the last local change and the push it triggers.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(800);

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay that collapses bursts of local changes into one push.
    pub debounce: Duration,
    /// Retry timing after failed pushes.
    pub backoff: BackoffPolicy,
    /// Where each user's document lives.
    pub document_path: DocPathTemplate,
    /// Hints used to pick a sign-in flow.
    pub environment: SignInEnvironment,
}

impl SyncConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            backoff: BackoffPolicy::default(),
            document_path: DocPathTemplate::default(),
            environment: SignInEnvironment::default(),
        }
    }

    /// Sets the debounce delay.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the document path template.
    pub fn with_document_path(mut self, template: impl Into<String>) -> Self {
        self.document_path = DocPathTemplate::new(template);
        self
    }

    /// Sets the sign-in environment.
    pub fn with_environment(mut self, environment: SignInEnvironment) -> Self {
        self.environment = environment;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

const MOBILE_MARKERS: [&str; 5] = ["Android", "iPhone", "iPad", "iPod", "Mobile"];

/// What the host knows about where it is running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignInEnvironment {
    /// Running as an installed, standalone app.
    pub standalone: bool,
    /// Host user agent, if there is one.
    pub user_agent: Option<String>,
}

impl SignInEnvironment {
    /// A desktop environment with no special hints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the environment as an installed, standalone app.
    pub fn standalone(mut self) -> Self {
        self.standalone = true;
        self
    }

    /// Sets the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Whether redirect sign-in should be used instead of a popup.
    ///
    /// This is a heuristic: standalone apps and mobile user agents tend to
    /// block or lose popups.
    pub fn prefers_redirect(&self) -> bool {
        self.standalone
            || self
                .user_agent
                .as_deref()
                .is_some_and(|ua| MOBILE_MARKERS.iter().any(|m| ua.contains(m)))
    }
}
