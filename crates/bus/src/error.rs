//! Event bus error types.

use common::EventId;
use thiserror::Error;

/// A single handler's failure while processing an event.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    /// Name of the handler that failed.
    pub handler: String,

    /// The handler's error, rendered.
    pub message: String,
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.handler, self.message)
    }
}

/// Errors that can occur when publishing on the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// One or more handlers failed. Every registered handler still
    /// received the event; the failures are collected here.
    #[error("{} of {attempted} handler(s) failed for event {event_id}", failures.len())]
    HandlerFailures {
        event_id: EventId,
        event_type: String,
        attempted: usize,
        failures: Vec<HandlerFailure>,
    },
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
