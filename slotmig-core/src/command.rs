//! Canonical command frame and reply types.

/// Command payload representation used between the wire layer, storage, and migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Command name in uppercase canonical form (e.g. `SET`, `RPUSH`).
    pub name: String,
    /// Raw byte arguments preserving wire-level payload.
    pub args: Vec<Vec<u8>>,
}

impl CommandFrame {
    /// Creates a command frame from a command name and argument list.
    #[must_use]
    pub fn new(name: impl Into<String>, args: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Encodes the frame as a RESP array of bulk strings, the request form every Redis-compatible
    /// server accepts.
    #[must_use]
    pub fn to_resp_bytes(&self) -> Vec<u8> {
        let mut output = format!("*{}\r\n", self.args.len() + 1).into_bytes();
        append_bulk(&mut output, self.name.as_bytes());
        for arg in &self.args {
            append_bulk(&mut output, arg);
        }
        output
    }
}

fn append_bulk(output: &mut Vec<u8>, payload: &[u8]) {
    output.extend_from_slice(format!("${}\r\n", payload.len()).as_bytes());
    output.extend_from_slice(payload);
    output.extend_from_slice(b"\r\n");
}

/// Canonical command reply representation.
///
/// The enum is protocol-neutral; RESP encoding happens at the network boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    /// `+OK` style replies.
    SimpleString(String),
    /// `$<len> ...` style binary-safe payload.
    BulkString(Vec<u8>),
    /// RESP null bulk string (`$-1`).
    Null,
    /// RESP integer reply (`:<n>`).
    Integer(i64),
    /// RESP array reply (`*<n> ...`).
    Array(Vec<CommandReply>),
    /// RESP null array (`*-1`).
    NullArray,
    /// `-ERR ...` style error.
    Error(String),
}

impl CommandReply {
    /// Shorthand for the `+OK` status reply.
    #[must_use]
    pub fn ok() -> Self {
        Self::SimpleString("OK".to_owned())
    }

    /// Returns true when the reply reports an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Encodes the reply into RESP bytes for Redis-compatible clients.
    #[must_use]
    pub fn to_resp_bytes(&self) -> Vec<u8> {
        match self {
            Self::SimpleString(value) => {
                let mut output = Vec::with_capacity(value.len() + 3);
                output.extend_from_slice(b"+");
                output.extend_from_slice(value.as_bytes());
                output.extend_from_slice(b"\r\n");
                output
            }
            Self::BulkString(value) => {
                let mut output = Vec::with_capacity(value.len() + 16);
                append_bulk(&mut output, value);
                output
            }
            Self::Null => b"$-1\r\n".to_vec(),
            Self::Integer(value) => format!(":{value}\r\n").into_bytes(),
            Self::Array(items) => {
                let mut output = format!("*{}\r\n", items.len()).into_bytes();
                for item in items {
                    output.extend_from_slice(&item.to_resp_bytes());
                }
                output
            }
            Self::NullArray => b"*-1\r\n".to_vec(),
            Self::Error(message) => {
                let mut output = Vec::with_capacity(message.len() + 7);
                output.extend_from_slice(b"-");
                if !has_error_code(message) {
                    output.extend_from_slice(b"ERR ");
                }
                output.extend_from_slice(message.as_bytes());
                output.extend_from_slice(b"\r\n");
                output
            }
        }
    }
}

/// Error messages starting with an upper-case code word (`WRONGTYPE ...`, `BUSY ...`) keep it.
fn has_error_code(message: &str) -> bool {
    let code = message.split(' ').next().unwrap_or_default();
    code.len() > 1 && code.bytes().all(|byte| byte.is_ascii_uppercase())
}
