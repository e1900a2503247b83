//! Core wire and value abstractions shared by storage, migration, and server layers.

pub mod command;
pub mod containers;
pub mod resp;
pub mod slot;
pub mod value;
