//! Shared types used across the persistence core.
//!
//! Provides newtype wrappers for identifiers and versions so that
//! aggregate ids, event ids, and version numbers cannot be mixed up,
//! plus the request-scoped [`RequestContext`] threaded into event metadata.

pub mod context;
pub mod types;

pub use context::RequestContext;
pub use types::{AggregateId, EventId, Version};
