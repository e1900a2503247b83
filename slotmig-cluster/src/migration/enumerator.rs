//! Resumable, read-only walk over the keys of one slot.

use slotmig_common::error::SmResult;
use slotmig_common::ids::SlotId;
use slotmig_core::value::DataType;
use slotmig_storage::SlotStore;
use slotmig_storage::slot_index::SlotCursor;

/// One key waiting to be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    /// Type the key held when it was enumerated.
    pub data_type: DataType,
    /// Key name.
    pub key: Vec<u8>,
}

impl PendingKey {
    /// Builds a pending key.
    #[must_use]
    pub fn new(data_type: DataType, key: Vec<u8>) -> Self {
        Self { data_type, key }
    }
}

/// Keys returned by one [`KeyEnumerator::read_batch`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratedBatch {
    /// Keys in slot-index order.
    pub keys: Vec<PendingKey>,
    /// Number of keys read.
    pub real_count: usize,
    /// No further batch will yield keys.
    pub is_final: bool,
}

/// Cursor over one slot's key index, optionally capped at a requested key count.
#[derive(Debug, Clone)]
pub struct KeyEnumerator {
    slot: SlotId,
    cursor: SlotCursor,
    quota: Option<usize>,
    yielded: usize,
    finished: bool,
}

impl KeyEnumerator {
    /// Starts at the beginning of `slot`; `requested == 0` walks the whole slot.
    #[must_use]
    pub fn new(slot: SlotId, requested: usize) -> Self {
        Self {
            slot,
            cursor: SlotCursor::start(),
            quota: (requested > 0).then_some(requested),
            yielded: 0,
            finished: false,
        }
    }

    /// Whether the final batch was already returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Reads up to `wanted` keys after the stored cursor and advances it.
    ///
    /// # Errors
    ///
    /// Propagates store read failures; the cursor is left unchanged.
    pub fn read_batch(&mut self, store: &dyn SlotStore, wanted: usize) -> SmResult<EnumeratedBatch> {
        if self.finished {
            return Ok(EnumeratedBatch {
                keys: Vec::new(),
                real_count: 0,
                is_final: true,
            });
        }
        let mut limit = wanted.max(1);
        if let Some(quota) = self.quota {
            limit = limit.min(quota.saturating_sub(self.yielded));
        }

        let scan = store.scan_slot_keys(self.slot, &self.cursor, limit)?;
        self.cursor = scan.next_cursor;
        self.yielded += scan.keys.len();
        let quota_reached = self.quota.is_some_and(|quota| self.yielded >= quota);
        self.finished = scan.exhausted || quota_reached;

        let keys = scan
            .keys
            .into_iter()
            .map(|(data_type, key)| PendingKey::new(data_type, key))
            .collect::<Vec<_>>();
        Ok(EnumeratedBatch {
            real_count: keys.len(),
            keys,
            is_final: self.finished,
        })
    }
}
