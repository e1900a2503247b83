//! Typed in-memory keyspace with lazy expiry and a per-slot key index.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use slotmig_common::error::{SmError, SmResult};
use slotmig_core::containers::{HotMap, HotSet};
use slotmig_core::slot::key_slot;
use slotmig_core::value::{DataType, StoredValue, ZSetValue};

use crate::slot_index::SlotIndex;

/// Current wall-clock time in unix milliseconds.
#[must_use]
pub fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

/// Value plus expiry metadata for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueEntry {
    /// Stored payload.
    pub value: StoredValue,
    /// Absolute expiry in unix milliseconds.
    pub expire_at_ms: Option<u64>,
}

impl ValueEntry {
    /// Entry without expiry.
    #[must_use]
    pub fn new(value: StoredValue) -> Self {
        Self {
            value,
            expire_at_ms: None,
        }
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        self.expire_at_ms.is_some_and(|expire_at| expire_at <= now_ms)
    }
}

fn empty_value(data_type: DataType) -> StoredValue {
    match data_type {
        DataType::String => StoredValue::String(Vec::new()),
        DataType::List => StoredValue::List(VecDeque::new()),
        DataType::Set => StoredValue::Set(HotSet::new()),
        DataType::Hash => StoredValue::Hash(HotMap::new()),
        DataType::ZSet => StoredValue::ZSet(ZSetValue::default()),
    }
}

/// Keyspace table.
///
/// Every insert/remove keeps the slot index in sync. Keys whose TTL elapsed are removed on first
/// access and parked in an expired list so the owning `Db` can journal their deletion.
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: HotMap<Vec<u8>, ValueEntry>,
    slots: SlotIndex,
    expired: Vec<Vec<u8>>,
}

impl Keyspace {
    /// Creates an empty keyspace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries (including not-yet-purged expired ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the keyspace holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read-only view of the slot index.
    #[must_use]
    pub fn slot_index(&self) -> &SlotIndex {
        &self.slots
    }

    /// Drains keys removed by lazy expiry since the last call.
    pub fn take_expired(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.expired)
    }

    fn purge_if_expired(&mut self, key: &[u8]) {
        let now_ms = now_unix_millis();
        if self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(now_ms))
        {
            let _ = self.remove(key);
            self.expired.push(key.to_vec());
        }
    }

    /// Returns the live entry for `key`.
    pub fn get(&mut self, key: &[u8]) -> Option<&ValueEntry> {
        self.purge_if_expired(key);
        self.entries.get(key)
    }

    /// Returns the live value for `key` when it has the requested type.
    ///
    /// # Errors
    ///
    /// Returns `SmError::WrongType` when the key holds another type.
    pub fn get_typed(&mut self, key: &[u8], data_type: DataType) -> SmResult<Option<&StoredValue>> {
        match self.get(key) {
            None => Ok(None),
            Some(entry) if entry.value.data_type() == data_type => Ok(Some(&entry.value)),
            Some(_) => Err(SmError::WrongType),
        }
    }

    /// Type of the live value under `key`.
    pub fn key_type(&mut self, key: &[u8]) -> Option<DataType> {
        self.get(key).map(|entry| entry.value.data_type())
    }

    /// Inserts or replaces one entry.
    pub fn insert(&mut self, key: Vec<u8>, entry: ValueEntry) -> Option<ValueEntry> {
        let slot = key_slot(&key);
        self.slots.insert(slot, key.clone(), entry.value.data_type());
        self.entries.insert(key, entry)
    }

    /// Removes one entry.
    pub fn remove(&mut self, key: &[u8]) -> Option<ValueEntry> {
        let removed = self.entries.remove(key)?;
        self.slots.remove(key_slot(key), key);
        Some(removed)
    }

    /// Returns the mutable value for `key`, creating an empty value of `data_type` if absent.
    ///
    /// # Errors
    ///
    /// Returns `SmError::WrongType` when the key holds another type.
    pub fn value_for_write(&mut self, key: &[u8], data_type: DataType) -> SmResult<&mut StoredValue> {
        self.purge_if_expired(key);
        if !self.entries.contains_key(key) {
            let _ = self.insert(key.to_vec(), ValueEntry::new(empty_value(data_type)));
        }
        let entry = self
            .entries
            .get_mut(key)
            .ok_or(SmError::InvalidState("keyspace entry vanished during write"))?;
        if entry.value.data_type() != data_type {
            return Err(SmError::WrongType);
        }
        Ok(&mut entry.value)
    }

    /// Returns the existing mutable value for `key`.
    ///
    /// # Errors
    ///
    /// Returns `SmError::WrongType` when the key holds another type.
    pub fn existing_for_write(
        &mut self,
        key: &[u8],
        data_type: DataType,
    ) -> SmResult<Option<&mut StoredValue>> {
        self.purge_if_expired(key);
        match self.entries.get_mut(key) {
            None => Ok(None),
            Some(entry) if entry.value.data_type() == data_type => Ok(Some(&mut entry.value)),
            Some(_) => Err(SmError::WrongType),
        }
    }

    /// Puts `key` back to a previously read state; `None` removes it.
    pub fn restore(&mut self, key: &[u8], entry: Option<ValueEntry>) {
        match entry {
            Some(entry) => {
                let _ = self.insert(key.to_vec(), entry);
            }
            None => {
                let _ = self.remove(key);
            }
        }
    }

    /// Drops `key` if it holds an empty collection.
    pub fn remove_if_empty(&mut self, key: &[u8]) {
        if self
            .entries
            .get(key)
            .is_some_and(|entry| entry.value.is_empty_collection())
        {
            let _ = self.remove(key);
        }
    }

    /// Sets or clears the absolute expiry of `key`; returns false when the key is absent.
    pub fn set_expire_at(&mut self, key: &[u8], expire_at_ms: Option<u64>) -> bool {
        self.purge_if_expired(key);
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        entry.expire_at_ms = expire_at_ms;
        true
    }

    /// Remaining time to live: `None` when absent, `Some(None)` when the key never expires.
    pub fn ttl_millis(&mut self, key: &[u8]) -> Option<Option<u64>> {
        let now_ms = now_unix_millis();
        let entry = self.get(key)?;
        Some(
            entry
                .expire_at_ms
                .map(|expire_at| expire_at.saturating_sub(now_ms)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Keyspace, ValueEntry, now_unix_millis};
    use slotmig_common::error::SmError;
    use slotmig_core::slot::key_slot;
    use slotmig_core::value::{DataType, StoredValue};
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn insert_and_remove_keep_slot_index_in_sync() {
        let mut keyspace = Keyspace::new();
        let slot = key_slot(b"user:1");
        let _ = keyspace.insert(
            b"user:1".to_vec(),
            ValueEntry::new(StoredValue::String(b"v".to_vec())),
        );
        assert_that!(keyspace.slot_index().count(slot), eq(1_usize));

        let _ = keyspace.remove(b"user:1");
        assert_that!(keyspace.slot_index().count(slot), eq(0_usize));
    }

    #[rstest]
    fn expired_key_is_purged_and_reported() {
        let mut keyspace = Keyspace::new();
        let mut entry = ValueEntry::new(StoredValue::String(b"v".to_vec()));
        entry.expire_at_ms = Some(now_unix_millis().saturating_sub(1));
        let _ = keyspace.insert(b"gone".to_vec(), entry);

        assert_that!(keyspace.get(b"gone").is_none(), eq(true));
        assert_that!(&keyspace.take_expired(), eq(&vec![b"gone".to_vec()]));
        assert_that!(keyspace.is_empty(), eq(true));
    }

    #[rstest]
    fn write_access_rejects_wrong_type() {
        let mut keyspace = Keyspace::new();
        let _ = keyspace.insert(
            b"k".to_vec(),
            ValueEntry::new(StoredValue::String(b"v".to_vec())),
        );
        let result = keyspace.value_for_write(b"k", DataType::List);
        assert_that!(&result.err(), eq(&Some(SmError::WrongType)));
    }

    #[rstest]
    fn empty_collection_is_dropped() {
        let mut keyspace = Keyspace::new();
        let _ = keyspace
            .value_for_write(b"list", DataType::List)
            .expect("fresh key accepts any type");
        keyspace.remove_if_empty(b"list");
        assert_that!(keyspace.key_type(b"list"), eq(None));
    }
}
