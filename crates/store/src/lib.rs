//! Versioned aggregate persistence.
//!
//! Aggregates are stored state-first: one row per aggregate holding the
//! serialized state and a version column checked on every write. Events
//! describing the mutation travel either through a transactional outbox
//! (the default) or are published directly after commit.
//!
//! The [`Storage`] trait abstracts the engine; [`PostgresStorage`] is the
//! production implementation and [`InMemoryStorage`] backs unit tests and
//! prototyping.

pub mod aggregate_store;
pub mod coordinator;
pub mod error;
pub mod idempotency;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod storage;

pub use aggregate_store::{AggregateStore, PersistenceMode};
pub use coordinator::{TransactionCoordinator, TxContext};
pub use error::{Result, StoreError};
pub use idempotency::IdempotencyCache;
pub use memory::InMemoryStorage;
pub use outbox::{OutboxEntry, OutboxStatus, OutboxStore, StatusCounts};
pub use postgres::PostgresStorage;
pub use storage::{AggregateRow, Storage};
