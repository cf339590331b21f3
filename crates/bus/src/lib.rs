//! In-process publish/subscribe fanout for domain events.
//!
//! The bus holds an explicit registry mapping event-type strings to an
//! ordered list of handlers, populated at startup by [`EventBus::subscribe`]
//! calls. It persists nothing: when delivery must survive a crash, the
//! outbox owns durability and the relay publishes through this bus.

pub mod bus;
pub mod error;
pub mod handler;

pub use bus::EventBus;
pub use error::{BusError, HandlerFailure};
pub use handler::{EventHandler, EventPublisher, HandlerError};
