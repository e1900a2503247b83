//! Shared database handle: keyspace plus the journaled write path.

use std::sync::{Arc, Mutex, MutexGuard};

use slotmig_common::error::{SmError, SmResult};
use slotmig_common::ids::SlotId;
use slotmig_core::command::{CommandFrame, CommandReply};
use slotmig_core::value::{DataType, StoredValue};
use slotmig_replication::Binlog;
use slotmig_replication::journal::JournalOp;
use tracing::warn;

use crate::dispatch::{CommandTable, apply};
use crate::keyspace::Keyspace;
use crate::slot_index::{SlotCursor, SlotScan};

/// Point-in-time copy of one key, as read by the migration serializer.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySnapshot {
    /// Full value.
    pub value: StoredValue,
    /// Remaining time to live in milliseconds.
    pub ttl_ms: Option<u64>,
}

/// Store interface consumed by slot migration.
pub trait SlotStore: Send + Sync {
    /// Reads the full value of `key` when it exists with type `data_type`.
    ///
    /// A missing key, or one now holding another type, reads as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot serve the read.
    fn get_typed(&self, key: &[u8], data_type: DataType) -> SmResult<Option<KeySnapshot>>;

    /// Type of the live value under `key`.
    fn key_type(&self, key: &[u8]) -> Option<DataType>;

    /// Deletes `key` and journals the deletion in one critical section.
    ///
    /// Deleting an absent key is not an error; the journal append still happens.
    ///
    /// # Errors
    ///
    /// Returns an error when the journal rejects the append.
    fn delete_logged(&self, key: &[u8]) -> SmResult<bool>;

    /// Reads up to `limit` keys of `slot` after `cursor`.
    ///
    /// # Errors
    ///
    /// Returns an error when the slot index cannot be read.
    fn scan_slot_keys(&self, slot: SlotId, cursor: &SlotCursor, limit: usize) -> SmResult<SlotScan>;

    /// Number of keys of `slot` currently stored.
    fn count_slot_keys(&self, slot: SlotId) -> usize;
}

/// Database handle shared by client connections and the migration engine.
///
/// Every mutation runs under the keyspace lock and is appended to the journal before the lock is
/// released, so no reader observes a mutation the journal does not hold yet.
pub struct Db {
    keyspace: Mutex<Keyspace>,
    binlog: Arc<dyn Binlog>,
    table: CommandTable,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("keys", &self.keyspace_guard().len())
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Creates an empty database journaling into `binlog`.
    #[must_use]
    pub fn new(binlog: Arc<dyn Binlog>) -> Self {
        Self {
            keyspace: Mutex::new(Keyspace::new()),
            binlog,
            table: CommandTable::with_builtin_commands(),
        }
    }

    fn keyspace_guard(&self) -> MutexGuard<'_, Keyspace> {
        self.keyspace
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Parses and executes one data command frame.
    #[must_use]
    pub fn execute(&self, frame: &CommandFrame) -> CommandReply {
        let command = match self.table.parse(frame) {
            Ok(command) => command,
            Err(message) => return CommandReply::Error(message),
        };
        if !command.is_write() {
            let mut keyspace = self.keyspace_guard();
            let reply = apply(&command, &mut keyspace);
            self.journal_expired(&mut keyspace);
            return reply;
        }
        self.mutate_logged(JournalOp::Command, frame, &command.written_keys(), |keyspace| {
            apply(&command, keyspace)
        })
        .unwrap_or_else(|error| CommandReply::Error(error.to_string()))
    }

    /// Applies one mutation and journals `frame` under the same keyspace lock.
    ///
    /// Nothing is journaled when the mutation replies with an error. When the append fails, every
    /// key in `touched` is put back to its state before the mutation, so the keyspace never holds a
    /// change the journal lacks.
    ///
    /// # Errors
    ///
    /// Returns the journal error when the append fails.
    pub fn mutate_logged<F>(
        &self,
        op: JournalOp,
        frame: &CommandFrame,
        touched: &[&[u8]],
        mutate: F,
    ) -> SmResult<CommandReply>
    where
        F: FnOnce(&mut Keyspace) -> CommandReply,
    {
        let mut keyspace = self.keyspace_guard();
        let before = touched
            .iter()
            .map(|key| (*key, keyspace.get(key).cloned()))
            .collect::<Vec<_>>();
        let reply = mutate(&mut keyspace);
        self.journal_expired(&mut keyspace);
        if reply.is_error() {
            return Ok(reply);
        }
        if let Err(error) = self.binlog.append(op, frame) {
            for (key, entry) in before {
                keyspace.restore(key, entry);
            }
            warn!(%error, command = %frame.name, "journal append failed; mutation rolled back");
            return Err(error);
        }
        Ok(reply)
    }

    fn journal_expired(&self, keyspace: &mut Keyspace) {
        for key in keyspace.take_expired() {
            let frame = CommandFrame::new("DEL", vec![key]);
            if let Err(error) = self.binlog.append(JournalOp::Expired, &frame) {
                warn!(%error, "failed to journal expired key");
            }
        }
    }

    /// Returns up to `limit` key names stored in `slot`.
    #[must_use]
    pub fn keys_in_slot(&self, slot: SlotId, limit: usize) -> Vec<Vec<u8>> {
        self.keyspace_guard()
            .slot_index()
            .scan(slot, &SlotCursor::start(), limit)
            .keys
            .into_iter()
            .map(|(_, key)| key)
            .collect()
    }

    /// Number of keys in the database.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keyspace_guard().len()
    }

    /// Whether the database holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keyspace_guard().is_empty()
    }
}

impl SlotStore for Db {
    fn get_typed(&self, key: &[u8], data_type: DataType) -> SmResult<Option<KeySnapshot>> {
        let mut keyspace = self.keyspace_guard();
        let value = match keyspace.get_typed(key, data_type) {
            Ok(Some(value)) => value.clone(),
            Ok(None) | Err(SmError::WrongType) => {
                self.journal_expired(&mut keyspace);
                return Ok(None);
            }
            Err(error) => return Err(error),
        };
        let ttl_ms = keyspace.ttl_millis(key).flatten();
        Ok(Some(KeySnapshot { value, ttl_ms }))
    }

    fn key_type(&self, key: &[u8]) -> Option<DataType> {
        let mut keyspace = self.keyspace_guard();
        let data_type = keyspace.key_type(key);
        self.journal_expired(&mut keyspace);
        data_type
    }

    fn delete_logged(&self, key: &[u8]) -> SmResult<bool> {
        let frame = CommandFrame::new("DEL", vec![key.to_vec()]);
        let reply = self.mutate_logged(JournalOp::MigratedOut, &frame, &[key], |keyspace| {
            CommandReply::Integer(i64::from(keyspace.remove(key).is_some()))
        })?;
        Ok(reply == CommandReply::Integer(1))
    }

    fn scan_slot_keys(&self, slot: SlotId, cursor: &SlotCursor, limit: usize) -> SmResult<SlotScan> {
        Ok(self.keyspace_guard().slot_index().scan(slot, cursor, limit))
    }

    fn count_slot_keys(&self, slot: SlotId) -> usize {
        self.keyspace_guard().slot_index().count(slot)
    }
}
