//! Fixed pool of migration workers, each owning one destination connection and one inbox.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use slotmig_common::config::MigrationConfig;
use slotmig_common::error::{SmError, SmResult};
use slotmig_storage::SlotStore;
use tracing::{debug, error, warn};

use super::connection::{Destination, DestinationConnection};
use super::enumerator::PendingKey;
use super::migrator::{KeyOutcome, MigrateKeyError, MigrateOptions, collect_replies, migrate_one_key};
use super::queue::{BlockingQueue, Popped, PushError};

/// What one worker reports back to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The destination acknowledged the key.
    Migrated {
        /// Reporting worker.
        worker: usize,
        /// Transferred key.
        key: PendingKey,
    },
    /// The key no longer existed with its enumerated type; nothing was sent.
    Absent {
        /// Reporting worker.
        worker: usize,
        /// Skipped key.
        key: PendingKey,
    },
    /// The key could not be transferred; the worker keeps running.
    KeyFailed {
        /// Reporting worker.
        worker: usize,
        /// Failed key.
        key: PendingKey,
        /// Destination or store error text.
        reason: String,
    },
    /// The connection broke; the worker has stopped.
    Died {
        /// Reporting worker.
        worker: usize,
        /// Link error text.
        reason: String,
        /// Keys written but never acknowledged, plus the key being transferred.
        unconfirmed: Vec<PendingKey>,
    },
}

/// Receiver of worker events.
pub type EventSink = dyn Fn(WorkerEvent) + Send + Sync;

struct WorkerContext {
    index: usize,
    connection: DestinationConnection,
    inbox: Arc<BlockingQueue<PendingKey>>,
    store: Arc<dyn SlotStore>,
    sink: Arc<EventSink>,
    options: MigrateOptions,
    window: usize,
}

struct WorkerHandle {
    inbox: Arc<BlockingQueue<PendingKey>>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Workers created and joined together for one migration task.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    next: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("next", &self.next)
            .finish()
    }
}

impl WorkerPool {
    /// Opens one checked connection per worker, then starts every worker thread.
    ///
    /// # Errors
    ///
    /// Returns the first connection or thread-spawn failure; connections and threads already
    /// created are torn down before returning.
    pub fn create(
        destination: &Destination,
        config: &MigrationConfig,
        store: &Arc<dyn SlotStore>,
        sink: &Arc<EventSink>,
    ) -> SmResult<Self> {
        let count = usize::from(config.worker_count.get());
        let mut connections = Vec::with_capacity(count);
        for _ in 0..count {
            connections.push(DestinationConnection::connect(destination)?);
        }

        let options = MigrateOptions {
            pipelined: config.pipelined,
            member_chunk: config.member_chunk(),
        };
        let mut pool = Self {
            workers: Vec::with_capacity(count),
            next: 0,
        };
        for (index, connection) in connections.into_iter().enumerate() {
            let inbox = Arc::new(BlockingQueue::bounded(config.inbox_capacity()));
            let context = WorkerContext {
                index,
                connection,
                inbox: Arc::clone(&inbox),
                store: Arc::clone(store),
                sink: Arc::clone(sink),
                options,
                window: config.inbox_capacity(),
            };
            let spawned = thread::Builder::new()
                .name(format!("slotmig-worker-{index}"))
                .spawn(move || worker_loop(context));
            match spawned {
                Ok(handle) => pool.workers.push(WorkerHandle {
                    inbox,
                    thread: Some(handle),
                }),
                Err(spawn_error) => {
                    let _ = pool.shutdown();
                    return Err(SmError::Io(spawn_error.to_string()));
                }
            }
        }
        Ok(pool)
    }

    /// Hands `key` to the next worker with inbox room, round-robin.
    ///
    /// # Errors
    ///
    /// Returns the key when every inbox is full or closed.
    pub fn dispatch(&mut self, key: PendingKey) -> Result<usize, PendingKey> {
        let mut key = key;
        for offset in 0..self.workers.len() {
            let index = (self.next + offset) % self.workers.len();
            match self.workers[index].inbox.try_push(key) {
                Ok(()) => {
                    self.next = (index + 1) % self.workers.len();
                    return Ok(index);
                }
                Err(rejected) => key = rejected.into_inner(),
            }
        }
        Err(key)
    }

    /// Takes back every key still waiting in an inbox.
    pub fn reclaim_undispatched(&self) -> Vec<PendingKey> {
        self.workers
            .iter()
            .flat_map(|worker| worker.inbox.drain())
            .collect()
    }

    /// Stops every worker and joins its thread; returns keys that never left an inbox.
    ///
    /// Keys a worker already took are finished before its thread exits. Calling this again is a
    /// no-op.
    pub fn shutdown(&mut self) -> Vec<PendingKey> {
        let undone = self.reclaim_undispatched();
        for worker in &self.workers {
            worker.inbox.close();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.thread.take()
                && handle.join().is_err()
            {
                error!("migration worker panicked");
            }
        }
        undone
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn worker_loop(mut context: WorkerContext) {
    let mut outstanding: VecDeque<(PendingKey, usize)> = VecDeque::new();
    loop {
        if outstanding.len() >= context.window
            && !flush_outstanding(&mut context, &mut outstanding)
        {
            return;
        }

        let key = match context.inbox.try_pop() {
            Popped::Item(key) => key,
            Popped::TimedOut | Popped::Closed => {
                // Written keys are acknowledged before the worker may block on an empty inbox.
                if !flush_outstanding(&mut context, &mut outstanding) {
                    return;
                }
                let Some(key) = context.inbox.pop() else {
                    debug!(worker = context.index, "migration worker stopped");
                    return;
                };
                key
            }
        };
        match migrate_one_key(
            &mut context.connection,
            context.store.as_ref(),
            &key,
            context.options,
        ) {
            Ok(KeyOutcome::Transferred) => (context.sink)(WorkerEvent::Migrated {
                worker: context.index,
                key,
            }),
            Ok(KeyOutcome::Sent { replies }) => outstanding.push_back((key, replies)),
            Ok(KeyOutcome::Absent) => (context.sink)(WorkerEvent::Absent {
                worker: context.index,
                key,
            }),
            Err(MigrateKeyError::Key(reason)) => {
                warn!(
                    worker = context.index,
                    key = %String::from_utf8_lossy(&key.key),
                    %reason,
                    "key migration failed"
                );
                (context.sink)(WorkerEvent::KeyFailed {
                    worker: context.index,
                    key,
                    reason,
                });
            }
            Err(MigrateKeyError::Connection(link_error)) => {
                let mut unconfirmed = outstanding.into_iter().map(|(key, _)| key).collect::<Vec<_>>();
                unconfirmed.push(key);
                die(&context, &link_error, unconfirmed);
                return;
            }
        }
    }
}

/// Collects acknowledgements for every pipelined key; returns false when the worker died.
fn flush_outstanding(
    context: &mut WorkerContext,
    outstanding: &mut VecDeque<(PendingKey, usize)>,
) -> bool {
    while let Some((key, replies)) = outstanding.pop_front() {
        match collect_replies(&mut context.connection, replies) {
            Ok(()) => (context.sink)(WorkerEvent::Migrated {
                worker: context.index,
                key,
            }),
            Err(MigrateKeyError::Key(reason)) => {
                warn!(
                    worker = context.index,
                    key = %String::from_utf8_lossy(&key.key),
                    %reason,
                    "key migration failed"
                );
                (context.sink)(WorkerEvent::KeyFailed {
                    worker: context.index,
                    key,
                    reason,
                });
            }
            Err(MigrateKeyError::Connection(link_error)) => {
                let mut unconfirmed = vec![key];
                unconfirmed.extend(outstanding.drain(..).map(|(key, _)| key));
                die(context, &link_error, unconfirmed);
                return false;
            }
        }
    }
    true
}

fn die(context: &WorkerContext, link_error: &SmError, unconfirmed: Vec<PendingKey>) {
    error!(
        worker = context.index,
        peer = context.connection.peer(),
        error = %link_error,
        "migration worker lost its destination connection"
    );
    context.inbox.close();
    context.connection.shutdown();
    (context.sink)(WorkerEvent::Died {
        worker: context.index,
        reason: link_error.to_string(),
        unconfirmed,
    });
}
