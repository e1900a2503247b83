//! Runtime configuration shared by the migration engine and the server bootstrap.

use std::time::Duration;

use crate::ids::WorkerCount;

/// Default number of outbound migration connections.
pub const DEFAULT_MIGRATION_WORKERS: u16 = 4;

/// Default per-worker inbox bound and pipeline window.
pub const DEFAULT_KEYS_PER_BATCH: usize = 64;

/// Default upper bound of members carried by one collection write command.
pub const DEFAULT_MAX_MEMBERS_PER_COMMAND: usize = 512;

/// Tunables of the slot migration engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Number of concurrent workers, each owning one destination connection.
    pub worker_count: WorkerCount,
    /// Inbox bound per worker; also the enumerator read size and the pipelined ack window.
    pub keys_per_batch: usize,
    /// Collections larger than this are split into several write commands.
    pub max_members_per_command: usize,
    /// Write commands without waiting for each key's acknowledgement before sending the next key.
    pub pipelined: bool,
    /// How long the coordinator waits for worker events before re-checking enumeration.
    pub event_tick: Duration,
}

impl MigrationConfig {
    /// Returns the validated inbox bound used by dispatch backpressure.
    #[must_use]
    pub fn inbox_capacity(&self) -> usize {
        self.keys_per_batch.max(1)
    }

    /// Returns the validated member chunk size used by the per-key serializer.
    #[must_use]
    pub fn member_chunk(&self) -> usize {
        self.max_members_per_command.max(1)
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            worker_count: WorkerCount::new(DEFAULT_MIGRATION_WORKERS)
                .expect("literal worker count must be non-zero"),
            keys_per_batch: DEFAULT_KEYS_PER_BATCH,
            max_members_per_command: DEFAULT_MAX_MEMBERS_PER_COMMAND,
            pipelined: false,
            event_tick: Duration::from_millis(20),
        }
    }
}

/// Log output format selected at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable compact lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Bootstrap configuration used by `slotmig-server` during process startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// RESP listener port.
    pub port: u16,
    /// Whether write commands are appended to the replication journal.
    pub journal_enabled: bool,
    /// Slot migration tunables.
    pub migration: MigrationConfig,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 6380,
            journal_enabled: true,
            migration: MigrationConfig::default(),
            log_format: LogFormat::Text,
        }
    }
}
