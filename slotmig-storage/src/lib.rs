//! Storage layer: typed keyspace, slot index, data commands, and the journaled write path.

pub mod db;
pub mod dispatch;
pub mod keyspace;
pub mod slot_index;

pub use db::{Db, KeySnapshot, SlotStore};
