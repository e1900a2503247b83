//! Per-slot secondary index of keys, the source the migration enumerator reads from.

use std::collections::BTreeMap;
use std::ops::Bound;

use slotmig_common::ids::SlotId;
use slotmig_core::containers::HotMap;
use slotmig_core::value::DataType;

/// Resumable position inside one slot's key index.
///
/// The cursor remembers the last key handed out, so keys removed concurrently never shift the
/// position of keys not yet read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotCursor {
    after: Option<Vec<u8>>,
}

impl SlotCursor {
    /// Cursor positioned before the first key.
    #[must_use]
    pub fn start() -> Self {
        Self::default()
    }
}

/// One page read from a slot index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotScan {
    /// `(type, key)` pairs in key order.
    pub keys: Vec<(DataType, Vec<u8>)>,
    /// Cursor to pass to the next read.
    pub next_cursor: SlotCursor,
    /// No key remains after `next_cursor`.
    pub exhausted: bool,
}

/// Ordered key sets, one per non-empty slot.
#[derive(Debug, Clone, Default)]
pub struct SlotIndex {
    slots: HotMap<SlotId, BTreeMap<Vec<u8>, DataType>>,
}

impl SlotIndex {
    /// Records `key` as living in `slot`.
    pub fn insert(&mut self, slot: SlotId, key: Vec<u8>, data_type: DataType) {
        let _ = self.slots.entry(slot).or_default().insert(key, data_type);
    }

    /// Forgets `key`; empty slots are dropped from the index.
    pub fn remove(&mut self, slot: SlotId, key: &[u8]) {
        let Some(keys) = self.slots.get_mut(&slot) else {
            return;
        };
        let _ = keys.remove(key);
        if keys.is_empty() {
            let _ = self.slots.remove(&slot);
        }
    }

    /// Number of keys currently indexed in `slot`.
    #[must_use]
    pub fn count(&self, slot: SlotId) -> usize {
        self.slots.get(&slot).map_or(0, BTreeMap::len)
    }

    /// Reads up to `limit` keys after `cursor`.
    #[must_use]
    pub fn scan(&self, slot: SlotId, cursor: &SlotCursor, limit: usize) -> SlotScan {
        let Some(keys) = self.slots.get(&slot) else {
            return SlotScan {
                keys: Vec::new(),
                next_cursor: cursor.clone(),
                exhausted: true,
            };
        };

        let lower = cursor
            .after
            .as_deref()
            .map_or(Bound::Unbounded, Bound::Excluded);
        let mut range = keys.range::<[u8], _>((lower, Bound::Unbounded));
        let page = range
            .by_ref()
            .take(limit)
            .map(|(key, data_type)| (*data_type, key.clone()))
            .collect::<Vec<_>>();
        let exhausted = range.next().is_none();
        let next_cursor = page.last().map_or_else(
            || cursor.clone(),
            |(_, key)| SlotCursor {
                after: Some(key.clone()),
            },
        );

        SlotScan {
            keys: page,
            next_cursor,
            exhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SlotCursor, SlotIndex};
    use slotmig_core::value::DataType;
    use googletest::prelude::*;
    use rstest::rstest;

    fn index_with(keys: &[&[u8]]) -> SlotIndex {
        let mut index = SlotIndex::default();
        for key in keys {
            index.insert(7, key.to_vec(), DataType::String);
        }
        index
    }

    #[rstest]
    fn scan_pages_through_slot_in_key_order() {
        let index = index_with(&[b"c", b"a", b"b"]);

        let first = index.scan(7, &SlotCursor::start(), 2);
        let first_keys = first.keys.iter().map(|(_, key)| key.clone()).collect::<Vec<_>>();
        assert_that!(&first_keys, eq(&vec![b"a".to_vec(), b"b".to_vec()]));
        assert_that!(first.exhausted, eq(false));

        let second = index.scan(7, &first.next_cursor, 2);
        assert_that!(second.keys.len(), eq(1_usize));
        assert_that!(second.exhausted, eq(true));
    }

    #[rstest]
    fn scan_tolerates_keys_removed_behind_and_ahead_of_cursor() {
        let mut index = index_with(&[b"a", b"b", b"c", b"d"]);
        let first = index.scan(7, &SlotCursor::start(), 2);

        index.remove(7, b"a");
        index.remove(7, b"c");

        let second = index.scan(7, &first.next_cursor, 10);
        let keys = second.keys.iter().map(|(_, key)| key.clone()).collect::<Vec<_>>();
        assert_that!(&keys, eq(&vec![b"d".to_vec()]));
        assert_that!(second.exhausted, eq(true));
    }

    #[rstest]
    fn missing_slot_is_exhausted_immediately() {
        let index = SlotIndex::default();
        let scan = index.scan(9, &SlotCursor::start(), 10);
        assert_that!(scan.keys.is_empty(), eq(true));
        assert_that!(scan.exhausted, eq(true));
        assert_that!(&scan.next_cursor, eq(&SlotCursor::start()));
    }

    #[rstest]
    fn removing_last_key_drops_slot() {
        let mut index = index_with(&[b"a"]);
        index.remove(7, b"a");
        assert_that!(index.count(7), eq(0_usize));
    }
}
