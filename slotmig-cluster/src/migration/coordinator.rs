//! Slot migration coordinator: task lifecycle, dispatch, confirmation handling, and progress.
//!
//! A task moves through `Idle -> Starting -> Migrating -> Draining -> Idle`, with `Cancelling`
//! and `Failed` as the two early exits. `Starting` runs in the caller; every later phase is
//! driven by one control thread per task that owns the worker pool and the enumerator.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use slotmig_common::config::MigrationConfig;
use slotmig_common::error::{SmError, SmResult};
use slotmig_common::ids::{MAX_SLOT_ID, SlotId};
use slotmig_core::containers::HotSet;
use slotmig_core::slot::key_slot;
use slotmig_storage::SlotStore;
use tracing::{debug, error, info, warn};

use super::connection::Destination;
use super::enumerator::{KeyEnumerator, PendingKey};
use super::queue::{BlockingQueue, Popped};
use super::worker::{EventSink, WorkerEvent, WorkerPool};

/// Coordinator lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    /// No task.
    Idle,
    /// Validating the request and opening worker connections.
    Starting,
    /// Enumerating and dispatching keys.
    Migrating,
    /// Enumeration finished; waiting for in-flight keys.
    Draining,
    /// Cancel requested; waiting for in-flight keys.
    Cancelling,
    /// A worker died or enumeration failed; tearing down.
    Failed,
}

impl MigrationPhase {
    /// Lowercase name used by the status command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Migrating => "migrating",
            Self::Draining => "draining",
            Self::Cancelling => "cancelling",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the last task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Every enumerated key was processed.
    Completed,
    /// Stopped by a cancel request.
    Cancelled,
    /// Stopped by a worker death or an enumeration failure.
    Failed,
}

impl TaskOutcome {
    /// Lowercase name used by the status command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// Progress snapshot, read under the lock that mutates the counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Destination of the current or last task (`host:port`).
    pub destination: Option<String>,
    /// Slot of the current or last task.
    pub slot: Option<SlotId>,
    /// Current phase.
    pub phase: MigrationPhase,
    /// Whether a task is running.
    pub migrating: bool,
    /// Keys handed to workers.
    pub sent: u64,
    /// Keys the destination acknowledged.
    pub acknowledged: u64,
    /// Keys deleted from this node after acknowledgement.
    pub moved: u64,
    /// Keys that failed to transfer.
    pub failed: u64,
    /// Keys of the slot still stored on this node.
    pub remaining: usize,
    /// Outcome of the last finished task.
    pub last_outcome: Option<TaskOutcome>,
    /// Last per-key or task-level error text.
    pub last_error: Option<String>,
}

enum ControlEvent {
    Worker(WorkerEvent),
    Wake,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    sent: u64,
    acknowledged: u64,
    moved: u64,
    failed: u64,
    remaining: usize,
}

struct TaskState {
    destination: Destination,
    slot: SlotId,
    pending: VecDeque<PendingKey>,
    tracked: HotSet<Vec<u8>>,
    outstanding: usize,
    cancel_requested: bool,
    events: Arc<BlockingQueue<ControlEvent>>,
}

struct CoordinatorState {
    phase: MigrationPhase,
    destination: Option<Destination>,
    slot: Option<SlotId>,
    counters: Counters,
    last_outcome: Option<TaskOutcome>,
    last_error: Option<String>,
    task: Option<TaskState>,
}

struct Shared {
    state: Mutex<CoordinatorState>,
    idle: Condvar,
    store: Arc<dyn SlotStore>,
    config: MigrationConfig,
}

enum Step {
    Continue,
    Finish(TaskOutcome),
}

/// Owner of at most one migration task at a time.
pub struct MigrationManager {
    shared: Arc<Shared>,
    control: Mutex<Option<thread::JoinHandle<()>>>,
}

impl fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationManager")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl MigrationManager {
    /// Creates an idle coordinator migrating keys out of `store`.
    #[must_use]
    pub fn new(store: Arc<dyn SlotStore>, config: MigrationConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CoordinatorState {
                    phase: MigrationPhase::Idle,
                    destination: None,
                    slot: None,
                    counters: Counters::default(),
                    last_outcome: None,
                    last_error: None,
                    task: None,
                }),
                idle: Condvar::new(),
                store,
                config,
            }),
            control: Mutex::new(None),
        }
    }

    /// Starts migrating up to `keys_num` keys of `slot` (`0` = the whole slot).
    ///
    /// # Errors
    ///
    /// Returns `SmError::Busy` while another task runs, `SmError::InvalidConfig` for a bad
    /// destination or slot, and the connection error when a worker cannot reach the
    /// destination. A failed start leaves the coordinator idle and the status unchanged.
    pub fn req_migrate_batch(
        &self,
        destination: Destination,
        slot: SlotId,
        keys_num: usize,
    ) -> SmResult<()> {
        if slot > MAX_SLOT_ID {
            return Err(SmError::InvalidConfig("slot is out of range"));
        }
        self.start_task(destination, slot, Some(KeyEnumerator::new(slot, keys_num)), None)
    }

    /// Migrates one key.
    ///
    /// When idle, a single-key task is started. When a task for the same destination and slot is
    /// running, the key joins its queue. Returns `false` when the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns `SmError::Busy` when a task for another destination or slot is running, plus the
    /// start errors of [`Self::req_migrate_batch`].
    pub fn req_migrate_one(&self, destination: Destination, key: &[u8]) -> SmResult<bool> {
        destination.validate()?;
        let slot = key_slot(key);
        {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            match state.phase {
                MigrationPhase::Idle => {}
                MigrationPhase::Migrating | MigrationPhase::Draining => {
                    let Some(task) = state.task.as_mut() else {
                        return Err(SmError::InvalidState("running phase without a task"));
                    };
                    if !task.destination.same_node(&destination) || task.slot != slot {
                        return Err(SmError::Busy("a task for another destination or slot is running"));
                    }
                    let Some(data_type) = self.shared.store.key_type(key) else {
                        return Ok(false);
                    };
                    if task.tracked.insert(key.to_vec()) {
                        task.pending
                            .push_back(PendingKey::new(data_type, key.to_vec()));
                        let _ = task.events.push(ControlEvent::Wake);
                    }
                    return Ok(true);
                }
                MigrationPhase::Starting
                | MigrationPhase::Cancelling
                | MigrationPhase::Failed => {
                    return Err(SmError::Busy("another migration task is running"));
                }
            }
        }

        let Some(data_type) = self.shared.store.key_type(key) else {
            return Ok(false);
        };
        self.start_task(
            destination,
            slot,
            None,
            Some(PendingKey::new(data_type, key.to_vec())),
        )?;
        Ok(true)
    }

    /// Requests cancellation; returns whether a running task was signalled.
    ///
    /// Keys still waiting in worker inboxes are dropped, keys a worker already took finish, and
    /// their confirmations are still applied.
    pub fn cancel(&self) -> bool {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        if !matches!(
            state.phase,
            MigrationPhase::Migrating | MigrationPhase::Draining
        ) {
            return false;
        }
        let Some(task) = state.task.as_mut() else {
            return false;
        };
        task.cancel_requested = true;
        let _ = task.events.push(ControlEvent::Wake);
        info!(slot = task.slot, "migration cancel requested");
        true
    }

    /// Returns the current progress snapshot.
    #[must_use]
    pub fn status(&self) -> MigrationStatus {
        let state = self.shared.lock();
        MigrationStatus {
            destination: state.destination.as_ref().map(ToString::to_string),
            slot: state.slot,
            phase: state.phase,
            migrating: state.phase != MigrationPhase::Idle,
            sent: state.counters.sent,
            acknowledged: state.counters.acknowledged,
            moved: state.counters.moved,
            failed: state.counters.failed,
            remaining: state.counters.remaining,
            last_outcome: state.last_outcome,
            last_error: state.last_error.clone(),
        }
    }

    /// Blocks until the coordinator is idle; returns false on timeout.
    #[must_use]
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.shared.lock();
        let (guard, _) = self
            .shared
            .idle
            .wait_timeout_while(guard, timeout, |state| {
                state.phase != MigrationPhase::Idle
            })
            .unwrap_or_else(PoisonError::into_inner);
        guard.phase == MigrationPhase::Idle
    }

    fn start_task(
        &self,
        destination: Destination,
        slot: SlotId,
        enumerator: Option<KeyEnumerator>,
        single: Option<PendingKey>,
    ) -> SmResult<()> {
        destination.validate()?;
        {
            let mut state = self.shared.lock();
            if state.phase != MigrationPhase::Idle {
                return Err(SmError::Busy("another migration task is running"));
            }
            state.phase = MigrationPhase::Starting;
        }
        self.join_control();

        let events = Arc::new(BlockingQueue::unbounded());
        let sink: Arc<EventSink> = {
            let events = Arc::clone(&events);
            Arc::new(move |event| {
                let _ = events.push(ControlEvent::Worker(event));
            })
        };
        let pool = match WorkerPool::create(
            &destination,
            &self.shared.config,
            &self.shared.store,
            &sink,
        ) {
            Ok(pool) => pool,
            Err(start_error) => {
                warn!(%destination, slot, error = %start_error, "migration start failed");
                self.shared.set_idle();
                return Err(start_error);
            }
        };

        {
            let mut state = self.shared.lock();
            let mut task = TaskState {
                destination: destination.clone(),
                slot,
                pending: VecDeque::new(),
                tracked: HotSet::new(),
                outstanding: 0,
                cancel_requested: false,
                events: Arc::clone(&events),
            };
            if let Some(key) = single {
                let _ = task.tracked.insert(key.key.clone());
                task.pending.push_back(key);
            }
            state.counters = Counters {
                remaining: self.shared.store.count_slot_keys(slot),
                ..Counters::default()
            };
            state.destination = Some(destination.clone());
            state.slot = Some(slot);
            state.last_error = None;
            state.task = Some(task);
            state.phase = MigrationPhase::Migrating;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("slotmig-coordinator".to_owned())
            .spawn(move || control_loop(&shared, pool, enumerator, &events));
        match spawned {
            Ok(handle) => {
                *self.control.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                info!(%destination, slot, workers = self.shared.config.worker_count.get(), "migration task started");
                Ok(())
            }
            Err(spawn_error) => {
                {
                    let mut state = self.shared.lock();
                    state.task = None;
                    state.last_outcome = Some(TaskOutcome::Failed);
                    state.last_error = Some(spawn_error.to_string());
                }
                self.shared.set_idle();
                Err(SmError::Io(spawn_error.to_string()))
            }
        }
    }

    fn join_control(&self) {
        let handle = self
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("migration control thread panicked");
        }
    }
}

impl Drop for MigrationManager {
    fn drop(&mut self) {
        let _ = self.cancel();
        self.join_control();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_idle(&self) {
        self.lock().phase = MigrationPhase::Idle;
        self.idle.notify_all();
    }

    /// Moves the task forward: cancel handling, refill, dispatch, and phase transitions.
    fn advance(&self, pool: &mut WorkerPool, enumerator: &mut Option<KeyEnumerator>) -> Step {
        let capacity = self.config.inbox_capacity();
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(task) = state.task.as_mut() else {
            return Step::Finish(TaskOutcome::Failed);
        };

        if task.cancel_requested
            && matches!(
                state.phase,
                MigrationPhase::Migrating | MigrationPhase::Draining
            )
        {
            state.phase = MigrationPhase::Cancelling;
            let returned = pool.reclaim_undispatched();
            task.outstanding = task.outstanding.saturating_sub(returned.len());
            for key in returned.iter().chain(task.pending.iter()) {
                let _ = task.tracked.remove(&key.key);
            }
            task.pending.clear();
            info!(
                slot = task.slot,
                in_flight = task.outstanding,
                "migration cancelling"
            );
        }

        match state.phase {
            MigrationPhase::Migrating | MigrationPhase::Draining => {}
            MigrationPhase::Cancelling if task.outstanding > 0 => return Step::Continue,
            MigrationPhase::Cancelling => return Step::Finish(TaskOutcome::Cancelled),
            MigrationPhase::Idle | MigrationPhase::Starting | MigrationPhase::Failed => {
                return Step::Finish(TaskOutcome::Failed);
            }
        }

        if let Some(walk) = enumerator.as_mut()
            && !walk.is_finished()
            && task.pending.len() < capacity
        {
            match walk.read_batch(self.store.as_ref(), capacity) {
                Ok(batch) => {
                    for key in batch.keys {
                        if task.tracked.insert(key.key.clone()) {
                            task.pending.push_back(key);
                        }
                    }
                    state.counters.remaining = self.store.count_slot_keys(task.slot);
                    debug!(
                        slot = task.slot,
                        read = batch.real_count,
                        is_final = batch.is_final,
                        "slot keys enumerated"
                    );
                }
                Err(read_error) => {
                    error!(slot = task.slot, error = %read_error, "slot enumeration failed");
                    state.last_error = Some(read_error.to_string());
                    state.phase = MigrationPhase::Failed;
                    return Step::Finish(TaskOutcome::Failed);
                }
            }
        }

        while let Some(key) = task.pending.pop_front() {
            match pool.dispatch(key) {
                Ok(_) => {
                    task.outstanding += 1;
                    state.counters.sent += 1;
                }
                Err(key) => {
                    task.pending.push_front(key);
                    break;
                }
            }
        }

        let enumeration_done = enumerator.as_ref().is_none_or(KeyEnumerator::is_finished);
        if state.phase == MigrationPhase::Migrating && enumeration_done && task.pending.is_empty() {
            state.phase = MigrationPhase::Draining;
            debug!(slot = task.slot, in_flight = task.outstanding, "migration draining");
        }
        if state.phase == MigrationPhase::Draining
            && task.pending.is_empty()
            && task.outstanding == 0
        {
            return Step::Finish(TaskOutcome::Completed);
        }
        Step::Continue
    }

    /// Applies one worker report. Confirmed keys are deleted and journaled unless the task failed.
    fn apply_event(&self, event: WorkerEvent) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(task) = state.task.as_mut() else {
            return;
        };
        match event {
            WorkerEvent::Migrated { worker, key } => {
                task.outstanding = task.outstanding.saturating_sub(1);
                let _ = task.tracked.remove(&key.key);
                state.counters.acknowledged += 1;
                if state.phase == MigrationPhase::Failed {
                    return;
                }
                match self.store.delete_logged(&key.key) {
                    Ok(_) => {
                        state.counters.moved += 1;
                        state.counters.remaining = self.store.count_slot_keys(task.slot);
                        debug!(
                            worker,
                            key = %String::from_utf8_lossy(&key.key),
                            "key moved"
                        );
                    }
                    Err(delete_error) => {
                        error!(error = %delete_error, "deleting a migrated key failed");
                        state.last_error = Some(delete_error.to_string());
                        state.phase = MigrationPhase::Failed;
                    }
                }
            }
            WorkerEvent::Absent { worker, key } => {
                task.outstanding = task.outstanding.saturating_sub(1);
                let _ = task.tracked.remove(&key.key);
                debug!(
                    worker,
                    key = %String::from_utf8_lossy(&key.key),
                    "key vanished before transfer"
                );
            }
            WorkerEvent::KeyFailed { key, reason, .. } => {
                task.outstanding = task.outstanding.saturating_sub(1);
                let _ = task.tracked.remove(&key.key);
                state.counters.failed += 1;
                state.last_error = Some(reason);
            }
            WorkerEvent::Died {
                worker,
                reason,
                unconfirmed,
            } => {
                task.outstanding = task.outstanding.saturating_sub(unconfirmed.len());
                for key in &unconfirmed {
                    let _ = task.tracked.remove(&key.key);
                }
                state.counters.failed += u64::try_from(unconfirmed.len()).unwrap_or(u64::MAX);
                state.last_error = Some(reason);
                if state.phase != MigrationPhase::Failed {
                    warn!(worker, slot = task.slot, "migration task failed");
                    state.phase = MigrationPhase::Failed;
                }
            }
        }
    }

    fn finish(&self, outcome: TaskOutcome) {
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            if let Some(slot) = state.slot {
                state.counters.remaining = self.store.count_slot_keys(slot);
            }
            state.task = None;
            state.last_outcome = Some(outcome);
            state.phase = MigrationPhase::Idle;
            info!(
                slot = state.slot,
                outcome = ?outcome,
                sent = state.counters.sent,
                moved = state.counters.moved,
                failed = state.counters.failed,
                remaining = state.counters.remaining,
                "migration task finished"
            );
        }
        self.idle.notify_all();
    }
}

fn control_loop(
    shared: &Shared,
    mut pool: WorkerPool,
    mut enumerator: Option<KeyEnumerator>,
    events: &BlockingQueue<ControlEvent>,
) {
    let tick = shared.config.event_tick;
    let outcome = loop {
        if let Step::Finish(outcome) = shared.advance(&mut pool, &mut enumerator) {
            break outcome;
        }
        match events.pop_timeout(tick) {
            Popped::Item(ControlEvent::Worker(event)) => shared.apply_event(event),
            Popped::Item(ControlEvent::Wake) | Popped::TimedOut => {}
            Popped::Closed => break TaskOutcome::Failed,
        }
    };

    let _ = pool.shutdown();
    events.close();
    while let Some(event) = events.pop() {
        if let ControlEvent::Worker(event) = event {
            shared.apply_event(event);
        }
    }
    shared.finish(outcome);
}
