//! Projection error types.

use thiserror::Error;

/// Errors that can occur while applying events to a projection.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The event payload did not deserialize into the expected shape.
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// The event type is not one this projection subscribed to.
    #[error("unexpected event type: {0}")]
    UnexpectedEventType(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
