//! Single-threaded mio reactor serving RESP clients of one node.
//!
//! Every accepted connection keeps its own read and write buffers. Requests are decoded
//! incrementally, executed in arrival order, and replies are flushed when the socket is writable.
//! A connection whose pending replies exceed the high watermark stops being read until the
//! buffer drains below the low watermark.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use slotmig_common::error::{SmError, SmResult};
use slotmig_core::containers::HotMap as HashMap;
use slotmig_core::resp::{ParseStatus, parse_next_command};
use tracing::{debug, warn};

use crate::app::NodeApp;

const LISTENER_TOKEN: Token = Token(0);
const CONNECTION_TOKEN_START: usize = 1;
const READ_CHUNK_BYTES: usize = 8192;
const DEFAULT_WRITE_HIGH_WATERMARK_BYTES: usize = 256 * 1024;
const DEFAULT_WRITE_LOW_WATERMARK_BYTES: usize = 128 * 1024;

/// Reactor sizing knobs; zero values fall back to the defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerReactorConfig {
    pub max_events: usize,
    pub write_high_watermark_bytes: usize,
    pub write_low_watermark_bytes: usize,
}

impl ServerReactorConfig {
    #[must_use]
    pub fn normalized_max_events(self) -> usize {
        self.max_events.max(64)
    }

    #[must_use]
    pub fn normalized_backpressure_watermarks(self) -> (usize, usize) {
        let high = self
            .write_high_watermark_bytes
            .max(DEFAULT_WRITE_HIGH_WATERMARK_BYTES);
        let mut low = self
            .write_low_watermark_bytes
            .max(DEFAULT_WRITE_LOW_WATERMARK_BYTES);
        if low >= high {
            low = high.saturating_sub(1);
        }
        (high, low)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionLifecycle {
    Active,
    Draining,
    Closing,
}

#[derive(Debug)]
struct ReactorConnection {
    socket: TcpStream,
    peer: SocketAddr,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    lifecycle: ConnectionLifecycle,
    read_paused_by_backpressure: bool,
    interest: Interest,
}

impl ReactorConnection {
    fn new(socket: TcpStream, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            read_buffer: Vec::new(),
            write_buffer: Vec::new(),
            lifecycle: ConnectionLifecycle::Active,
            read_paused_by_backpressure: false,
            interest: Interest::READABLE,
        }
    }

    fn mark_draining(&mut self) {
        if self.lifecycle == ConnectionLifecycle::Active {
            self.lifecycle = ConnectionLifecycle::Draining;
        }
    }

    fn mark_closing(&mut self) {
        self.lifecycle = ConnectionLifecycle::Closing;
    }

    fn can_read(&self) -> bool {
        self.lifecycle == ConnectionLifecycle::Active && !self.read_paused_by_backpressure
    }

    fn should_try_flush(&self) -> bool {
        !self.write_buffer.is_empty()
    }

    fn should_close_now(&self) -> bool {
        self.lifecycle == ConnectionLifecycle::Closing
            || (self.lifecycle == ConnectionLifecycle::Draining && self.write_buffer.is_empty())
    }

    fn update_backpressure_state(&mut self, high_watermark: usize, low_watermark: usize) {
        if self.read_paused_by_backpressure {
            if self.write_buffer.len() <= low_watermark {
                self.read_paused_by_backpressure = false;
            }
            return;
        }
        if self.write_buffer.len() >= high_watermark {
            self.read_paused_by_backpressure = true;
        }
    }

    /// Executes every complete request in the read buffer; returns false after a framing error.
    fn execute_buffered_requests(
        &mut self,
        app: &NodeApp,
        high_watermark: usize,
        low_watermark: usize,
    ) -> bool {
        loop {
            match parse_next_command(&self.read_buffer) {
                Ok(ParseStatus::Incomplete) => return true,
                Ok(ParseStatus::Complete { value, consumed }) => {
                    let _ = self.read_buffer.drain(..consumed);
                    let reply = app.execute(&value);
                    self.write_buffer
                        .extend_from_slice(&reply.to_resp_bytes());
                    self.update_backpressure_state(high_watermark, low_watermark);
                }
                Err(error) => {
                    debug!(peer = %self.peer, error = %error, "closing connection after bad request");
                    let message = match error {
                        SmError::Protocol(detail) => format!("-ERR Protocol error: {detail}\r\n"),
                        other => format!("-ERR {other}\r\n"),
                    };
                    self.write_buffer.extend_from_slice(message.as_bytes());
                    self.read_buffer.clear();
                    self.mark_draining();
                    return false;
                }
            }
        }
    }
}

/// One reactor owning the RESP listener and all accepted connections.
#[derive(Debug)]
pub struct ServerReactor {
    poll: Poll,
    events: Events,
    ready_events: Vec<(Token, bool, bool, bool)>,
    listener: TcpListener,
    next_token: usize,
    write_high_watermark: usize,
    write_low_watermark: usize,
    connections: HashMap<Token, ReactorConnection>,
}

impl ServerReactor {
    /// Binds the RESP listener and registers it in the poller.
    ///
    /// # Errors
    ///
    /// Returns `SmError::Io` if the listener cannot be bound or registered.
    pub fn bind(addr: SocketAddr, config: ServerReactorConfig) -> SmResult<Self> {
        let poll = Poll::new().map_err(|error| SmError::Io(format!("create poll failed: {error}")))?;
        let (write_high_watermark, write_low_watermark) =
            config.normalized_backpressure_watermarks();

        let mut listener = TcpListener::bind(addr)
            .map_err(|error| SmError::Io(format!("bind RESP listener failed: {error}")))?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(|error| SmError::Io(format!("register RESP listener in poll failed: {error}")))?;

        Ok(Self {
            poll,
            events: Events::with_capacity(config.normalized_max_events()),
            ready_events: Vec::with_capacity(config.normalized_max_events()),
            listener,
            next_token: CONNECTION_TOKEN_START,
            write_high_watermark,
            write_low_watermark,
            connections: HashMap::new(),
        })
    }

    /// Processes one readiness cycle and executes every request that became complete.
    ///
    /// # Errors
    ///
    /// Returns `SmError::Io` if polling, accepting, or poll registration fails.
    pub fn poll_once(&mut self, app: &NodeApp, timeout: Option<Duration>) -> SmResult<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => return Ok(0),
            Err(error) => return Err(SmError::Io(format!("poll wait failed: {error}"))),
        }
        self.ready_events.clear();
        for event in &self.events {
            self.ready_events.push((
                event.token(),
                event.is_readable(),
                event.is_writable(),
                event.is_read_closed() || event.is_write_closed() || event.is_error(),
            ));
        }

        let ready_count = self.ready_events.len();
        for index in 0..ready_count {
            let (token, readable, writable, closed_or_error) = self.ready_events[index];
            if token == LISTENER_TOKEN {
                self.accept_new_connections()?;
                continue;
            }
            self.handle_connection_event(app, token, readable, writable, closed_or_error)?;
        }

        Ok(ready_count)
    }

    /// Address the RESP listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns `SmError::Io` if the socket cannot report its address.
    pub fn local_addr(&self) -> SmResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|error| SmError::Io(format!("query local address failed: {error}")))
    }

    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn accept_new_connections(&mut self) -> SmResult<()> {
        loop {
            match self.listener.accept() {
                Ok((mut socket, peer)) => {
                    let token = self.allocate_connection_token();
                    self.poll
                        .registry()
                        .register(&mut socket, token, Interest::READABLE)
                        .map_err(|error| {
                            SmError::Io(format!(
                                "register accepted connection in poll failed: {error}"
                            ))
                        })?;
                    let _ = socket.set_nodelay(true);
                    debug!(peer = %peer, token = token.0, "client connected");
                    let _ = self
                        .connections
                        .insert(token, ReactorConnection::new(socket, peer));
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(error) => {
                    warn!(error = %error, "accept failed");
                    return Ok(());
                }
            }
        }
    }

    fn handle_connection_event(
        &mut self,
        app: &NodeApp,
        token: Token,
        readable: bool,
        writable: bool,
        closed_or_error: bool,
    ) -> SmResult<()> {
        let Some(mut connection) = self.connections.remove(&token) else {
            return Ok(());
        };

        // Bytes that arrived before the hangup are still served.
        if readable && connection.can_read() {
            Self::read_connection_bytes(
                app,
                &mut connection,
                self.write_high_watermark,
                self.write_low_watermark,
            );
        }
        if closed_or_error {
            connection.mark_draining();
        }
        if writable && connection.should_try_flush() {
            Self::flush_connection_writes(
                &mut connection,
                self.write_high_watermark,
                self.write_low_watermark,
            );
        }

        if connection.should_close_now() {
            return self.close_connection(token, connection);
        }

        self.refresh_connection_interest(token, &mut connection)?;
        let _ = self.connections.insert(token, connection);
        Ok(())
    }

    fn read_connection_bytes(
        app: &NodeApp,
        connection: &mut ReactorConnection,
        write_high_watermark: usize,
        write_low_watermark: usize,
    ) {
        let mut chunk = [0_u8; READ_CHUNK_BYTES];
        loop {
            match connection.socket.read(&mut chunk) {
                Ok(0) => {
                    connection.mark_draining();
                    return;
                }
                Ok(read_len) => {
                    connection.read_buffer.extend_from_slice(&chunk[..read_len]);
                    if !connection.execute_buffered_requests(
                        app,
                        write_high_watermark,
                        write_low_watermark,
                    ) {
                        return;
                    }
                    if connection.read_paused_by_backpressure {
                        // Leave the rest in the kernel buffer until replies drain.
                        return;
                    }
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_error) => {
                    connection.mark_closing();
                    return;
                }
            }
        }
    }

    fn flush_connection_writes(
        connection: &mut ReactorConnection,
        write_high_watermark: usize,
        write_low_watermark: usize,
    ) {
        while !connection.write_buffer.is_empty() {
            match connection.socket.write(connection.write_buffer.as_slice()) {
                Ok(0) => {
                    connection.mark_closing();
                    return;
                }
                Ok(written) => {
                    let _ = connection.write_buffer.drain(..written);
                    connection.update_backpressure_state(write_high_watermark, write_low_watermark);
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_error) => {
                    connection.mark_closing();
                    return;
                }
            }
        }
    }

    fn refresh_connection_interest(
        &self,
        token: Token,
        connection: &mut ReactorConnection,
    ) -> SmResult<()> {
        let mut next_interest = if connection.can_read() {
            Interest::READABLE
        } else {
            Interest::WRITABLE
        };
        if !connection.write_buffer.is_empty() {
            next_interest |= Interest::WRITABLE;
        }
        if next_interest == connection.interest {
            return Ok(());
        }

        self.poll
            .registry()
            .reregister(&mut connection.socket, token, next_interest)
            .map_err(|error| {
                SmError::Io(format!("refresh connection poll interest failed: {error}"))
            })?;
        connection.interest = next_interest;
        Ok(())
    }

    fn close_connection(&self, token: Token, mut connection: ReactorConnection) -> SmResult<()> {
        self.poll
            .registry()
            .deregister(&mut connection.socket)
            .map_err(|error| {
                SmError::Io(format!(
                    "deregister closed connection {} failed: {error}",
                    token.0
                ))
            })?;
        debug!(peer = %connection.peer, token = token.0, "client disconnected");
        Ok(())
    }

    fn allocate_connection_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token = self.next_token.saturating_add(1);
        token
    }
}

#[cfg(test)]
mod tests;
