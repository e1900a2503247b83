//! Replication journal (binlog) layer.

pub mod journal;

use std::sync::{Mutex, MutexGuard};

use journal::{InMemoryJournal, JournalEntry, JournalOp};
use slotmig_common::error::SmResult;
use slotmig_common::ids::Lsn;
use slotmig_core::command::CommandFrame;
use tracing::trace;

/// Append side of the replication log.
///
/// Writers record every mutation here so replicas re-apply it in the same order.
pub trait Binlog: Send + Sync {
    /// Appends one mutation and returns its assigned position.
    ///
    /// # Errors
    ///
    /// Returns an error when the log cannot accept the entry.
    fn append(&self, op: JournalOp, frame: &CommandFrame) -> SmResult<Lsn>;
}

/// Process-local replication log.
#[derive(Debug)]
pub struct ReplicationLog {
    /// Whether appends are recorded at all.
    pub enabled: bool,
    journal: Mutex<InMemoryJournal>,
}

impl ReplicationLog {
    /// Creates the replication log.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            journal: Mutex::new(InMemoryJournal::new()),
        }
    }

    fn journal_guard(&self) -> MutexGuard<'_, InMemoryJournal> {
        self.journal
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Returns current journal snapshot.
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.journal_guard().entries().to_vec()
    }

    /// Returns entries at or after one LSN.
    #[must_use]
    pub fn entries_from(&self, from: Lsn) -> Vec<JournalEntry> {
        self.journal_guard().entries_from(from).to_vec()
    }

    /// Returns current replication LSN cursor.
    #[must_use]
    pub fn current_lsn(&self) -> Lsn {
        self.journal_guard().current_lsn()
    }
}

impl Binlog for ReplicationLog {
    fn append(&self, op: JournalOp, frame: &CommandFrame) -> SmResult<Lsn> {
        let mut journal = self.journal_guard();
        if !self.enabled {
            return Ok(journal.current_lsn());
        }
        let lsn = journal.append(op, frame);
        trace!(lsn, command = %frame.name, ?op, "journal append");
        Ok(lsn)
    }
}

#[cfg(test)]
mod tests {
    use super::{Binlog, ReplicationLog};
    use crate::journal::JournalOp;
    use slotmig_core::command::CommandFrame;
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn disabled_log_drops_entries() {
        let log = ReplicationLog::new(false);
        let lsn = log
            .append(JournalOp::Command, &CommandFrame::new("DEL", vec![b"k".to_vec()]))
            .expect("append must not fail");
        assert_that!(lsn, eq(0_u64));
        assert_that!(log.entries().is_empty(), eq(true));
    }

    #[rstest]
    fn enabled_log_assigns_increasing_lsns() {
        let log = ReplicationLog::new(true);
        let frame = CommandFrame::new("DEL", vec![b"k".to_vec()]);
        let first = log
            .append(JournalOp::MigratedOut, &frame)
            .expect("append must not fail");
        let second = log
            .append(JournalOp::MigratedOut, &frame)
            .expect("append must not fail");
        assert_that!(second, eq(first + 1));
        assert_that!(log.current_lsn(), eq(second));
        assert_that!(log.entries_from(second).len(), eq(1_usize));
    }
}
