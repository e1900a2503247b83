//! Streaming RESP decoding for request frames and replies.
//!
//! Both decoders work on a buffer that may hold a partial message: they return
//! [`ParseStatus::Incomplete`] until enough bytes have arrived, and report how many bytes a
//! complete message consumed so the caller can drain them.

use slotmig_common::error::{SmError, SmResult};

use crate::command::{CommandFrame, CommandReply};

/// Largest bulk payload accepted from the wire.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest array length accepted from the wire.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Largest inline command line accepted from the wire.
const MAX_INLINE_LEN: usize = 64 * 1024;

/// Result of trying to decode one message from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus<T> {
    /// More bytes are required.
    Incomplete,
    /// One full message was decoded from the buffer prefix.
    Complete {
        /// Decoded message.
        value: T,
        /// Number of buffer bytes the message occupied.
        consumed: usize,
    },
}

/// Decodes one client request: a RESP array of bulk strings or an inline command line.
///
/// # Errors
///
/// Returns `SmError::Protocol` when the buffer violates RESP framing.
pub fn parse_next_command(buffer: &[u8]) -> SmResult<ParseStatus<CommandFrame>> {
    match buffer.first() {
        None => Ok(ParseStatus::Incomplete),
        Some(b'*') => {
            let Some((reply, consumed)) = parse_reply_at(buffer, 0)? else {
                return Ok(ParseStatus::Incomplete);
            };
            let frame = frame_from_array(reply)?;
            Ok(ParseStatus::Complete {
                value: frame,
                consumed,
            })
        }
        Some(_) => parse_inline_command(buffer),
    }
}

/// Decodes one server reply.
///
/// # Errors
///
/// Returns `SmError::Protocol` when the buffer violates RESP framing.
pub fn parse_next_reply(buffer: &[u8]) -> SmResult<ParseStatus<CommandReply>> {
    Ok(match parse_reply_at(buffer, 0)? {
        None => ParseStatus::Incomplete,
        Some((value, consumed)) => ParseStatus::Complete { value, consumed },
    })
}

fn frame_from_array(reply: CommandReply) -> SmResult<CommandFrame> {
    let CommandReply::Array(items) = reply else {
        return Err(SmError::Protocol("expected array request".to_owned()));
    };
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        let CommandReply::BulkString(payload) = item else {
            return Err(SmError::Protocol(
                "request array items must be bulk strings".to_owned(),
            ));
        };
        parts.push(payload);
    }
    if parts.is_empty() {
        return Err(SmError::Protocol("empty request array".to_owned()));
    }
    let name = String::from_utf8_lossy(&parts.remove(0)).to_ascii_uppercase();
    Ok(CommandFrame::new(name, parts))
}

fn parse_inline_command(buffer: &[u8]) -> SmResult<ParseStatus<CommandFrame>> {
    let Some(line_end) = find_crlf(buffer, 0) else {
        if buffer.len() > MAX_INLINE_LEN {
            return Err(SmError::Protocol("inline request is too long".to_owned()));
        }
        return Ok(ParseStatus::Incomplete);
    };
    let mut words = buffer[..line_end]
        .split(u8::is_ascii_whitespace)
        .filter(|word| !word.is_empty())
        .map(<[u8]>::to_vec);
    let Some(name) = words.next() else {
        return Err(SmError::Protocol("empty inline request".to_owned()));
    };
    let name = String::from_utf8_lossy(&name).to_ascii_uppercase();
    Ok(ParseStatus::Complete {
        value: CommandFrame::new(name, words.collect()),
        consumed: line_end + 2,
    })
}

fn find_crlf(buffer: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(2)
        .position(|window| window == b"\r\n")
        .map(|offset| from + offset)
}

fn parse_line_i64(line: &[u8]) -> SmResult<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| {
            SmError::Protocol(format!(
                "invalid integer line '{}'",
                String::from_utf8_lossy(line)
            ))
        })
}

fn parse_length(line: &[u8], limit: usize, what: &str) -> SmResult<Option<usize>> {
    let raw = parse_line_i64(line)?;
    if raw == -1 {
        return Ok(None);
    }
    let length = usize::try_from(raw)
        .map_err(|_| SmError::Protocol(format!("invalid {what} length {raw}")))?;
    if length > limit {
        return Err(SmError::Protocol(format!("{what} length {length} exceeds limit")));
    }
    Ok(Some(length))
}

/// Decodes one RESP value starting at `position`; returns the value and the offset just past it.
fn parse_reply_at(buffer: &[u8], position: usize) -> SmResult<Option<(CommandReply, usize)>> {
    let Some(marker) = buffer.get(position).copied() else {
        return Ok(None);
    };
    let Some(line_end) = find_crlf(buffer, position + 1) else {
        return Ok(None);
    };
    let line = &buffer[position + 1..line_end];
    let next = line_end + 2;

    match marker {
        b'+' => Ok(Some((
            CommandReply::SimpleString(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b'-' => Ok(Some((
            CommandReply::Error(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b':' => Ok(Some((CommandReply::Integer(parse_line_i64(line)?), next))),
        b'$' => {
            let Some(length) = parse_length(line, MAX_BULK_LEN, "bulk")? else {
                return Ok(Some((CommandReply::Null, next)));
            };
            let payload_end = next + length;
            if buffer.len() < payload_end + 2 {
                return Ok(None);
            }
            if &buffer[payload_end..payload_end + 2] != b"\r\n" {
                return Err(SmError::Protocol(
                    "bulk payload is not terminated by CRLF".to_owned(),
                ));
            }
            Ok(Some((
                CommandReply::BulkString(buffer[next..payload_end].to_vec()),
                payload_end + 2,
            )))
        }
        b'*' => {
            let Some(count) = parse_length(line, MAX_ARRAY_LEN, "array")? else {
                return Ok(Some((CommandReply::NullArray, next)));
            };
            let mut items = Vec::with_capacity(count.min(1024));
            let mut cursor = next;
            for _ in 0..count {
                let Some((item, after)) = parse_reply_at(buffer, cursor)? else {
                    return Ok(None);
                };
                items.push(item);
                cursor = after;
            }
            Ok(Some((CommandReply::Array(items), cursor)))
        }
        other => Err(SmError::Protocol(format!(
            "unexpected RESP type marker '{}'",
            char::from(other)
        ))),
    }
}
