//! Request-scoped context threaded into event metadata.

use serde::{Deserialize, Serialize};

/// Correlation and causation identifiers for a single request.
///
/// The context is passed explicitly as a parameter through command
/// handlers into the aggregate's event metadata. Nothing in the store
/// or relay reads it from ambient global state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Identifier correlating all events caused by one external request.
    pub correlation_id: Option<String>,

    /// Identifier of the event or command that directly caused this one.
    pub causation_id: Option<String>,

    /// The user on whose behalf the request is executing.
    pub user_id: Option<String>,
}

impl RequestContext {
    /// Creates an empty context with no identifiers set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a context with a correlation id.
    pub fn with_correlation(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            causation_id: None,
            user_id: None,
        }
    }

    /// Sets the causation id.
    pub fn caused_by(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    /// Sets the user id.
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}
