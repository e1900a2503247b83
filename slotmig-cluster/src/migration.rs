//! Slot migration: key enumeration, per-key transfer, worker pool, and the coordinator.

pub mod connection;
pub mod coordinator;
pub mod enumerator;
pub mod migrator;
pub mod queue;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{Destination, DestinationConnection};
pub use coordinator::{MigrationManager, MigrationPhase, MigrationStatus, TaskOutcome};
pub use enumerator::{EnumeratedBatch, KeyEnumerator, PendingKey};
pub use migrator::{KeyOutcome, MigrateKeyError, MigrateOptions, migrate_one_key, serialize_key};
pub use queue::{BlockingQueue, Popped, PushError};
pub use worker::{EventSink, WorkerEvent, WorkerPool};
