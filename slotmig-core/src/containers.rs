//! Hot-path container aliases used by keyspace and migration data structures.
//!
//! Container choices stay centralized here so later allocator/container upgrades do not touch
//! command or migration logic.

use hashbrown::{HashMap as HbMap, HashSet as HbSet};

/// Hot-path hash map used by keyspace tables and hash values.
pub type HotMap<K, V> = HbMap<K, V>;

/// Hot-path hash set used by set values and in-flight key tracking.
pub type HotSet<T> = HbSet<T>;
