use super::{ServerReactor, ServerReactorConfig};
use crate::app::NodeApp;
use googletest::prelude::*;
use rstest::rstest;
use slotmig_common::config::NodeConfig;
use slotmig_core::command::{CommandFrame, CommandReply};
use slotmig_core::resp::{ParseStatus, parse_next_reply};
use slotmig_core::slot::key_slot;
use slotmig_replication::ReplicationLog;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn new_app() -> NodeApp {
    NodeApp::new(NodeConfig::default(), Arc::new(ReplicationLog::new(true)))
}

fn bind_loopback() -> ServerReactor {
    ServerReactor::bind(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        ServerReactorConfig::default(),
    )
    .expect("reactor bind should succeed")
}

/// Polls the reactor while reading from a nonblocking client until `expected` bytes arrived.
fn poll_until_response(
    reactor: &mut ServerReactor,
    app: &NodeApp,
    client: &mut TcpStream,
    expected: &[u8],
) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_millis(600);
    let mut response = Vec::new();
    while Instant::now() < deadline {
        let _ = reactor
            .poll_once(app, Some(Duration::from_millis(5)))
            .expect("reactor poll should succeed");

        let mut chunk = [0_u8; 256];
        match client.read(&mut chunk) {
            Ok(0) => break,
            Ok(read_len) => {
                response.extend_from_slice(&chunk[..read_len]);
                if response.len() >= expected.len() {
                    break;
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(error) => panic!("read from client failed: {error}"),
        }
    }
    response
}

#[rstest]
fn reactor_executes_resp_ping_roundtrip() {
    let app = new_app();
    let mut reactor = bind_loopback();
    let listen_addr = reactor
        .local_addr()
        .expect("local addr should be available");

    let mut client = TcpStream::connect(listen_addr).expect("connect should succeed");
    client
        .set_nonblocking(true)
        .expect("nonblocking client should be configurable");
    client
        .write_all(b"*1\r\n$4\r\nPING\r\n")
        .expect("write ping should succeed");

    let response = poll_until_response(&mut reactor, &app, &mut client, b"+PONG\r\n");
    assert_that!(&response, eq(&b"+PONG\r\n".to_vec()));
    assert_that!(reactor.connection_count(), eq(1_usize));
}

#[rstest]
fn reactor_answers_pipelined_requests_split_across_writes_in_order() {
    let app = new_app();
    let mut reactor = bind_loopback();
    let mut client =
        TcpStream::connect(reactor.local_addr().expect("local addr should be available"))
            .expect("connect should succeed");
    client
        .set_nonblocking(true)
        .expect("nonblocking client should be configurable");

    client
        .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*2\r\n$3\r\nGE")
        .expect("first write should succeed");
    let _ = reactor
        .poll_once(&app, Some(Duration::from_millis(20)))
        .expect("reactor poll should succeed");
    client
        .write_all(b"T\r\n$1\r\nk\r\n")
        .expect("second write should succeed");

    let expected = b"+OK\r\n$1\r\nv\r\n";
    let response = poll_until_response(&mut reactor, &app, &mut client, expected);
    assert_that!(&response, eq(&expected.to_vec()));
}

#[rstest]
fn reactor_replies_with_protocol_error_then_closes() {
    let app = new_app();
    let mut reactor = bind_loopback();
    let mut client =
        TcpStream::connect(reactor.local_addr().expect("local addr should be available"))
            .expect("connect should succeed");
    client
        .set_nonblocking(true)
        .expect("nonblocking client should be configurable");
    client
        .write_all(b"*1\r\n:12\r\n")
        .expect("write should succeed");

    let response = poll_until_response(&mut reactor, &app, &mut client, b"-ERR Protocol error");
    assert_that!(response.starts_with(b"-ERR Protocol error"), eq(true));

    let deadline = Instant::now() + Duration::from_millis(600);
    while reactor.connection_count() > 0 && Instant::now() < deadline {
        let _ = reactor
            .poll_once(&app, Some(Duration::from_millis(5)))
            .expect("reactor poll should succeed");
    }
    assert_that!(reactor.connection_count(), eq(0_usize));
}

#[rstest]
fn normalized_watermarks_keep_low_below_high() {
    let config = ServerReactorConfig {
        max_events: 0,
        write_high_watermark_bytes: 1024 * 1024,
        write_low_watermark_bytes: 4 * 1024 * 1024,
    };
    let (high, low) = config.normalized_backpressure_watermarks();
    assert_that!(high, eq(1024 * 1024));
    assert_that!(low, eq(1024 * 1024 - 1));
    assert_that!(config.normalized_max_events(), eq(64_usize));
}

/// A node serving its reactor on a background thread until dropped.
struct RunningNode {
    app: Arc<NodeApp>,
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RunningNode {
    fn start() -> Self {
        let app = Arc::new(new_app());
        let mut reactor = bind_loopback();
        let addr = reactor.local_addr().expect("local addr should be available");
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let app = Arc::clone(&app);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    let _ = reactor
                        .poll_once(&app, Some(Duration::from_millis(5)))
                        .expect("reactor poll should succeed");
                }
            })
        };
        Self {
            app,
            addr,
            stop,
            thread: Some(thread),
        }
    }

    fn client(&self) -> Client {
        let stream = TcpStream::connect(self.addr).expect("connect should succeed");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout should be configurable");
        Client {
            stream,
            buffer: Vec::new(),
        }
    }
}

impl Drop for RunningNode {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Client {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl Client {
    fn call(&mut self, name: &str, args: &[&[u8]]) -> CommandReply {
        let frame = CommandFrame::new(name, args.iter().map(|arg| arg.to_vec()).collect());
        self.stream
            .write_all(&frame.to_resp_bytes())
            .expect("request write should succeed");
        loop {
            if let ParseStatus::Complete { value, consumed } =
                parse_next_reply(&self.buffer).expect("reply should be valid RESP")
            {
                let _ = self.buffer.drain(..consumed);
                return value;
            }
            let mut chunk = [0_u8; 1024];
            let read_len = self
                .stream
                .read(&mut chunk)
                .expect("reply read should succeed");
            assert_that!(read_len, gt(0_usize));
            self.buffer.extend_from_slice(&chunk[..read_len]);
        }
    }
}

fn status_field(status: &CommandReply, name: &str) -> CommandReply {
    let CommandReply::Array(items) = status else {
        panic!("status must be an array, got {status:?}");
    };
    items
        .chunks_exact(2)
        .find(|pair| pair[0] == CommandReply::BulkString(name.as_bytes().to_vec()))
        .map(|pair| pair[1].clone())
        .unwrap_or_else(|| panic!("status field {name} is missing"))
}

#[rstest]
fn slot_moves_between_two_nodes_over_resp() {
    let source = RunningNode::start();
    let target = RunningNode::start();
    let mut source_client = source.client();
    let mut target_client = target.client();

    assert_that!(
        &source_client.call("SET", &[b"{n}a", b"alpha", b"PX", b"60000"]),
        eq(&CommandReply::ok())
    );
    assert_that!(
        &source_client.call("RPUSH", &[b"{n}b", b"1", b"2", b"3"]),
        eq(&CommandReply::Integer(3))
    );
    assert_that!(
        &source_client.call("HSET", &[b"{n}c", b"f", b"v"]),
        eq(&CommandReply::Integer(1))
    );
    assert_that!(
        &source_client.call("SET", &[b"elsewhere", b"stays"]),
        eq(&CommandReply::ok())
    );

    let slot = key_slot(b"{n}a").to_string();
    let port = target.addr.port().to_string();
    assert_that!(
        &source_client.call(
            "SLOTSMGRTSLOT-ASYNC",
            &[b"127.0.0.1", port.as_bytes(), b"5000", slot.as_bytes(), b"0"]
        ),
        eq(&CommandReply::ok())
    );
    assert_that!(
        source.app.migration().wait_idle(Duration::from_secs(10)),
        eq(true)
    );

    let status = source_client.call("SLOTSMGRT-ASYNC-STATUS", &[]);
    assert_that!(&status_field(&status, "moved"), eq(&CommandReply::Integer(3)));
    assert_that!(&status_field(&status, "remaining"), eq(&CommandReply::Integer(0)));
    assert_that!(&status_field(&status, "migrating"), eq(&CommandReply::Integer(0)));
    assert_that!(
        &status_field(&status, "last_outcome"),
        eq(&CommandReply::BulkString(b"completed".to_vec()))
    );

    assert_that!(
        &source_client.call("CLUSTER", &[b"COUNTKEYSINSLOT", slot.as_bytes()]),
        eq(&CommandReply::Integer(0))
    );
    assert_that!(
        &source_client.call("GET", &[b"elsewhere"]),
        eq(&CommandReply::BulkString(b"stays".to_vec()))
    );
    assert_that!(
        &target_client.call("GET", &[b"{n}a"]),
        eq(&CommandReply::BulkString(b"alpha".to_vec()))
    );
    let CommandReply::Integer(ttl) = target_client.call("PTTL", &[b"{n}a"]) else {
        panic!("PTTL must reply with an integer");
    };
    assert_that!(ttl, gt(0));
    assert_that!(
        &target_client.call("LRANGE", &[b"{n}b", b"0", b"-1"]),
        eq(&CommandReply::Array(vec![
            CommandReply::BulkString(b"1".to_vec()),
            CommandReply::BulkString(b"2".to_vec()),
            CommandReply::BulkString(b"3".to_vec()),
        ]))
    );
    assert_that!(
        &target_client.call("HGET", &[b"{n}c", b"f"]),
        eq(&CommandReply::BulkString(b"v".to_vec()))
    );
}
