//! Blocking outbound RESP connection to the migration destination.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use slotmig_common::error::{SmError, SmResult};
use slotmig_core::command::{CommandFrame, CommandReply};
use slotmig_core::resp::{ParseStatus, parse_next_reply};

const READ_CHUNK: usize = 16 * 1024;

/// Remote node receiving migrated keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Host name or address.
    pub host: String,
    /// RESP port.
    pub port: u16,
    /// Connect, read, and write timeout of every connection.
    pub timeout: Duration,
}

impl Destination {
    /// Builds a destination address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Checks the parts of the address that can be rejected without I/O.
    ///
    /// # Errors
    ///
    /// Returns `SmError::InvalidConfig` for an empty host, port zero, or a zero timeout.
    pub fn validate(&self) -> SmResult<()> {
        if self.host.is_empty() {
            return Err(SmError::InvalidConfig("destination host is empty"));
        }
        if self.port == 0 {
            return Err(SmError::InvalidConfig("destination port must be non-zero"));
        }
        if self.timeout.is_zero() {
            return Err(SmError::InvalidConfig("destination timeout must be non-zero"));
        }
        Ok(())
    }

    /// Whether `other` names the same node.
    #[must_use]
    pub fn same_node(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One TCP connection owned by exactly one worker.
#[derive(Debug)]
pub struct DestinationConnection {
    stream: TcpStream,
    peer: String,
    read_buffer: Vec<u8>,
}

impl DestinationConnection {
    /// Connects to `destination` and checks it answers `PING` with `PONG`.
    ///
    /// # Errors
    ///
    /// Returns `SmError::Connection` when the address does not resolve, the connect or
    /// handshake fails, or the peer answers anything but `PONG`.
    pub fn connect(destination: &Destination) -> SmResult<Self> {
        let peer = destination.to_string();
        let addresses = (destination.host.as_str(), destination.port)
            .to_socket_addrs()
            .map_err(|error| connection_error(&peer, &error))?;

        let mut last_error = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, destination.timeout) {
                Ok(stream) => {
                    let mut connection = Self::from_stream(stream, peer, destination.timeout)?;
                    connection.ping()?;
                    return Ok(connection);
                }
                Err(error) => last_error = Some(error),
            }
        }
        Err(last_error.map_or_else(
            || SmError::Connection(format!("{peer}: address did not resolve")),
            |error| connection_error(&peer, &error),
        ))
    }

    fn from_stream(stream: TcpStream, peer: String, timeout: Duration) -> SmResult<Self> {
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|()| stream.set_write_timeout(Some(timeout)))
            .and_then(|()| stream.set_nodelay(true))
            .map_err(|error| connection_error(&peer, &error))?;
        Ok(Self {
            stream,
            peer,
            read_buffer: Vec::new(),
        })
    }

    fn ping(&mut self) -> SmResult<()> {
        self.send(&[CommandFrame::new("PING", Vec::new())])?;
        match self.read_reply()? {
            CommandReply::SimpleString(reply) if reply == "PONG" => Ok(()),
            other => Err(SmError::Connection(format!(
                "{}: unexpected handshake reply {other:?}",
                self.peer
            ))),
        }
    }

    /// Address this connection points at.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Writes all frames back to back.
    ///
    /// # Errors
    ///
    /// Returns `SmError::Connection` when the write fails or times out.
    pub fn send(&mut self, frames: &[CommandFrame]) -> SmResult<()> {
        let mut payload = Vec::new();
        for frame in frames {
            payload.extend_from_slice(&frame.to_resp_bytes());
        }
        self.stream
            .write_all(&payload)
            .and_then(|()| self.stream.flush())
            .map_err(|error| connection_error(&self.peer, &error))
    }

    /// Reads exactly one reply.
    ///
    /// # Errors
    ///
    /// Returns `SmError::Connection` on timeout, EOF, or a read failure, and `SmError::Protocol`
    /// when the peer sends malformed RESP.
    pub fn read_reply(&mut self) -> SmResult<CommandReply> {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            if let ParseStatus::Complete { value, consumed } = parse_next_reply(&self.read_buffer)? {
                let _ = self.read_buffer.drain(..consumed);
                return Ok(value);
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(SmError::Connection(format!(
                        "{}: connection closed by peer",
                        self.peer
                    )));
                }
                Ok(read) => self.read_buffer.extend_from_slice(&chunk[..read]),
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => return Err(connection_error(&self.peer, &error)),
            }
        }
    }

    /// Closes both directions; later calls fail with a connection error.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Drop for DestinationConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn connection_error(peer: &str, error: &std::io::Error) -> SmError {
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            SmError::Connection(format!("{peer}: timed out"))
        }
        _ => SmError::Connection(format!("{peer}: {error}")),
    }
}
