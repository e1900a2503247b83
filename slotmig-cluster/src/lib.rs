//! Slot migration engine: moves every key of one slot to another node while traffic continues.

pub mod migration;

pub use migration::{
    Destination, MigrationManager, MigrationPhase, MigrationStatus, TaskOutcome,
};
