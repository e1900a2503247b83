//! Journal entry model used by replication pathways.

use slotmig_common::error::{SmError, SmResult};
use slotmig_common::ids::Lsn;
use slotmig_core::command::CommandFrame;
use slotmig_core::resp::{ParseStatus, parse_next_command};

/// Journal operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalOp {
    /// Regular write command payload.
    Command,
    /// Delete issued after a key was handed off to another node.
    MigratedOut,
    /// Expiry-driven delete payload.
    Expired,
}

/// One append-only journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Position assigned on append, starting at 1.
    pub lsn: Lsn,
    /// Operation kind.
    pub op: JournalOp,
    /// RESP-encoded command replicas re-apply.
    pub payload: Vec<u8>,
}

impl JournalEntry {
    /// Decodes the command frame carried by this entry.
    ///
    /// # Errors
    ///
    /// Returns `SmError::Protocol` when the payload is not one complete RESP request.
    pub fn frame(&self) -> SmResult<CommandFrame> {
        match parse_next_command(&self.payload)? {
            ParseStatus::Complete { value, consumed } if consumed == self.payload.len() => {
                Ok(value)
            }
            _ => Err(SmError::Protocol(format!(
                "journal entry {} does not hold exactly one command",
                self.lsn
            ))),
        }
    }
}

/// In-memory append-only journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryJournal {
    entries: Vec<JournalEntry>,
}

impl InMemoryJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends one command to the journal tail and returns its LSN.
    pub fn append(&mut self, op: JournalOp, frame: &CommandFrame) -> Lsn {
        let lsn = self.current_lsn() + 1;
        self.entries.push(JournalEntry {
            lsn,
            op,
            payload: frame.to_resp_bytes(),
        });
        lsn
    }

    /// LSN of the last appended entry, `0` when empty.
    #[must_use]
    pub fn current_lsn(&self) -> Lsn {
        self.entries.last().map_or(0, |entry| entry.lsn)
    }

    /// Returns all journal entries in append order.
    #[must_use]
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Returns entries with `lsn >= from`.
    #[must_use]
    pub fn entries_from(&self, from: Lsn) -> &[JournalEntry] {
        let start = self.entries.partition_point(|entry| entry.lsn < from);
        &self.entries[start..]
    }

    /// Number of currently buffered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the journal is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryJournal, JournalOp};
    use slotmig_core::command::CommandFrame;
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn in_memory_journal_appends_entries_in_order() {
        let mut journal = InMemoryJournal::new();
        let first = journal.append(
            JournalOp::Command,
            &CommandFrame::new("SET", vec![b"a".to_vec(), b"b".to_vec()]),
        );
        let second = journal.append(
            JournalOp::MigratedOut,
            &CommandFrame::new("DEL", vec![b"a".to_vec()]),
        );

        assert_that!(first, eq(1_u64));
        assert_that!(second, eq(2_u64));
        assert_that!(journal.len(), eq(2_usize));
        assert_that!(journal.entries()[1].op, eq(JournalOp::MigratedOut));
        let frame = journal.entries()[1].frame().expect("payload must decode");
        assert_that!(frame.name, eq("DEL"));
    }

    #[rstest]
    #[case(0, 3)]
    #[case(2, 2)]
    #[case(4, 0)]
    fn entries_from_skips_older_positions(#[case] from: u64, #[case] expected: usize) {
        let mut journal = InMemoryJournal::new();
        for key in [b"a", b"b", b"c"] {
            let _ = journal.append(
                JournalOp::Command,
                &CommandFrame::new("DEL", vec![key.to_vec()]),
            );
        }
        assert_that!(journal.entries_from(from).len(), eq(expected));
    }
}
