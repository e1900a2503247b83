//! Canonical identifier types used across storage, replication, and migration.

use std::num::NonZeroU16;

/// Cluster hash slot identifier.
pub type SlotId = u16;

/// Upper bound of the Redis-compatible hash slot space.
pub const MAX_SLOT_ID: SlotId = 0x3FFF;

/// Number of hash slots.
pub const SLOT_COUNT: usize = MAX_SLOT_ID as usize + 1;

/// Monotonic journal position assigned on append.
pub type Lsn = u64;

/// Strongly typed worker-count wrapper so a migration pool can never be built empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerCount(NonZeroU16);

impl WorkerCount {
    /// Creates a validated worker count.
    ///
    /// Returns `None` for zero because a migration needs at least one outbound connection.
    #[must_use]
    pub fn new(value: u16) -> Option<Self> {
        NonZeroU16::new(value).map(Self)
    }

    /// Returns the inner count.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0.get()
    }
}

/// Checks that a raw slot number parsed from the wire is inside the slot space.
#[must_use]
pub fn slot_from_i64(value: i64) -> Option<SlotId> {
    SlotId::try_from(value)
        .ok()
        .filter(|slot| *slot <= MAX_SLOT_ID)
}

#[cfg(test)]
mod tests {
    use super::{MAX_SLOT_ID, WorkerCount, slot_from_i64};
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn worker_count_rejects_zero() {
        assert_that!(WorkerCount::new(0), eq(None));
    }

    #[rstest]
    #[case(1)]
    #[case(8)]
    #[case(u16::MAX)]
    fn worker_count_accepts_positive_values(#[case] input: u16) {
        let count = WorkerCount::new(input).expect("positive count must be valid");
        assert_that!(count.get(), eq(input));
    }

    #[rstest]
    #[case(0, Some(0))]
    #[case(16_383, Some(MAX_SLOT_ID))]
    #[case(16_384, None)]
    #[case(-1, None)]
    fn slot_parsing_respects_slot_space(#[case] raw: i64, #[case] expected: Option<u16>) {
        assert_that!(slot_from_i64(raw), eq(expected));
    }
}
