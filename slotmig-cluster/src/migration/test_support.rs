//! Test doubles: an in-process RESP destination over a real `Db`, and a store with injectable
//! read and delete failures.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use slotmig_common::error::{SmError, SmResult};
use slotmig_common::ids::SlotId;
use slotmig_core::command::{CommandFrame, CommandReply};
use slotmig_core::resp::{ParseStatus, parse_next_command};
use slotmig_core::value::DataType;
use slotmig_replication::ReplicationLog;
use slotmig_storage::slot_index::{SlotCursor, SlotScan};
use slotmig_storage::{Db, KeySnapshot, SlotStore};

use super::connection::Destination;

#[derive(Default)]
struct Behaviour {
    paused: bool,
    reject_key: Option<Vec<u8>>,
    sever_on_key: Option<Vec<u8>>,
    severed: bool,
    open_connections: usize,
    streams: Vec<TcpStream>,
}

#[derive(Default)]
struct Control {
    behaviour: Mutex<Behaviour>,
    changed: Condvar,
    stopping: AtomicBool,
}

impl Control {
    fn lock(&self) -> std::sync::MutexGuard<'_, Behaviour> {
        self.behaviour.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sever_all(behaviour: &mut Behaviour) {
        behaviour.severed = true;
        for stream in behaviour.streams.drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Destination node listening on `127.0.0.1:0`.
pub(crate) struct TestDestination {
    pub(crate) db: Arc<Db>,
    port: u16,
    control: Arc<Control>,
    accept: Option<thread::JoinHandle<()>>,
}

impl TestDestination {
    pub(crate) fn start() -> Self {
        let db = Arc::new(Db::new(Arc::new(ReplicationLog::new(true))));
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind must succeed");
        let port = listener.local_addr().expect("addr must resolve").port();
        let control = Arc::new(Control::default());
        let accept = {
            let db = Arc::clone(&db);
            let control = Arc::clone(&control);
            thread::spawn(move || accept_loop(&listener, &db, &control))
        };
        Self {
            db,
            port,
            control,
            accept: Some(accept),
        }
    }

    pub(crate) fn destination(&self) -> Destination {
        Destination::new("127.0.0.1", self.port, Duration::from_secs(5))
    }

    /// Holds every non-`PING` command until [`Self::resume`].
    pub(crate) fn pause(&self) {
        self.control.lock().paused = true;
    }

    pub(crate) fn resume(&self) {
        self.control.lock().paused = false;
        self.control.changed.notify_all();
    }

    /// Replies with an error to every command addressing `key`.
    pub(crate) fn reject_key(&self, key: &[u8]) {
        self.control.lock().reject_key = Some(key.to_vec());
    }

    /// Drops every connection, and refuses new ones, once a command addresses `key`.
    pub(crate) fn sever_on_key(&self, key: &[u8]) {
        self.control.lock().sever_on_key = Some(key.to_vec());
    }

    pub(crate) fn execute(&self, name: &str, args: &[&[u8]]) -> CommandReply {
        self.db.execute(&CommandFrame::new(
            name,
            args.iter().map(|arg| arg.to_vec()).collect(),
        ))
    }

    /// Waits until at most `expected` connections remain open.
    pub(crate) fn wait_open_connections(&self, expected: usize, timeout: Duration) -> bool {
        let guard = self.control.lock();
        let (guard, _) = self
            .control
            .changed
            .wait_timeout_while(guard, timeout, |behaviour| {
                behaviour.open_connections > expected
            })
            .unwrap_or_else(PoisonError::into_inner);
        guard.open_connections <= expected
    }
}

impl Drop for TestDestination {
    fn drop(&mut self) {
        self.control.stopping.store(true, Ordering::SeqCst);
        {
            let mut behaviour = self.control.lock();
            behaviour.paused = false;
            Control::sever_all(&mut behaviour);
        }
        self.control.changed.notify_all();
        let _ = TcpStream::connect(("127.0.0.1", self.port));
        if let Some(handle) = self.accept.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: &TcpListener, db: &Arc<Db>, control: &Arc<Control>) {
    for stream in listener.incoming() {
        if control.stopping.load(Ordering::SeqCst) {
            return;
        }
        let Ok(stream) = stream else {
            continue;
        };
        {
            let mut behaviour = control.lock();
            if behaviour.severed {
                let _ = stream.shutdown(Shutdown::Both);
                continue;
            }
            let Ok(clone) = stream.try_clone() else {
                continue;
            };
            behaviour.streams.push(clone);
            behaviour.open_connections += 1;
        }
        let db = Arc::clone(db);
        let control = Arc::clone(control);
        let _ = thread::spawn(move || {
            serve_connection(stream, &db, &control);
            control.lock().open_connections -= 1;
            control.changed.notify_all();
        });
    }
}

fn serve_connection(mut stream: TcpStream, db: &Db, control: &Control) {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        let read = match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(read) => read,
        };
        buffer.extend_from_slice(&chunk[..read]);
        loop {
            let (frame, consumed) = match parse_next_command(&buffer) {
                Ok(ParseStatus::Complete { value, consumed }) => (value, consumed),
                Ok(ParseStatus::Incomplete) => break,
                Err(_) => return,
            };
            let _ = buffer.drain(..consumed);
            let Some(reply) = respond(&frame, db, control) else {
                return;
            };
            if stream.write_all(&reply.to_resp_bytes()).is_err() {
                return;
            }
        }
    }
}

fn respond(frame: &CommandFrame, db: &Db, control: &Control) -> Option<CommandReply> {
    if frame.name == "PING" {
        return Some(db.execute(frame));
    }
    let key = frame.args.first();
    let mut behaviour = control
        .changed
        .wait_while(control.lock(), |behaviour| behaviour.paused)
        .unwrap_or_else(PoisonError::into_inner);
    if behaviour.severed {
        return None;
    }
    if key.is_some() && behaviour.sever_on_key.as_ref() == key {
        Control::sever_all(&mut behaviour);
        return None;
    }
    if key.is_some() && behaviour.reject_key.as_ref() == key {
        return Some(CommandReply::Error("ERR rejected by test destination".to_owned()));
    }
    drop(behaviour);
    Some(db.execute(frame))
}

/// `SlotStore` over a real `Db` whose slot scans or deletions can be switched to fail.
pub(crate) struct FailingStore {
    db: Arc<Db>,
    fail_scan: AtomicBool,
    fail_delete: AtomicBool,
}

impl FailingStore {
    pub(crate) fn new(db: Arc<Db>) -> Self {
        Self {
            db,
            fail_scan: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_scans(&self) {
        self.fail_scan.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_deletes(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }
}

impl SlotStore for FailingStore {
    fn get_typed(&self, key: &[u8], data_type: DataType) -> SmResult<Option<KeySnapshot>> {
        self.db.get_typed(key, data_type)
    }

    fn key_type(&self, key: &[u8]) -> Option<DataType> {
        self.db.key_type(key)
    }

    fn delete_logged(&self, key: &[u8]) -> SmResult<bool> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(SmError::Io("journal device is full".to_owned()));
        }
        self.db.delete_logged(key)
    }

    fn scan_slot_keys(&self, slot: SlotId, cursor: &SlotCursor, limit: usize) -> SmResult<SlotScan> {
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(SmError::Io("slot index unreadable".to_owned()));
        }
        self.db.scan_slot_keys(slot, cursor, limit)
    }

    fn count_slot_keys(&self, slot: SlotId) -> usize {
        self.db.count_slot_keys(slot)
    }
}
