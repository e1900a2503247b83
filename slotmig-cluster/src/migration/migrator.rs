//! Serializes one key into native write commands and ships it to the destination.

use slotmig_common::error::SmError;
use slotmig_core::command::{CommandFrame, CommandReply};
use slotmig_core::value::{StoredValue, format_score};
use slotmig_storage::{KeySnapshot, SlotStore};
use thiserror::Error;

use super::connection::DestinationConnection;
use super::enumerator::PendingKey;

/// Failure of one key transfer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MigrateKeyError {
    /// This key could not be moved; the connection is still usable.
    #[error("key transfer failed: {0}")]
    Key(String),
    /// The link to the destination is broken; the worker must stop.
    #[error("destination link failed: {0}")]
    Connection(SmError),
}

/// Successful result of one key transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The destination acknowledged every command.
    Transferred,
    /// Commands were written; `replies` acknowledgements are still outstanding.
    Sent {
        /// Number of replies the caller must collect.
        replies: usize,
    },
    /// The key vanished or changed type since it was enumerated; nothing was sent.
    Absent,
}

/// Per-call migrator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Return after writing instead of waiting for acknowledgements.
    pub pipelined: bool,
    /// Largest number of members per collection command.
    pub member_chunk: usize,
}

/// Builds the commands recreating `key` on the destination.
///
/// The first command deletes any value already there, the last one restores the TTL.
#[must_use]
pub fn serialize_key(key: &[u8], snapshot: &KeySnapshot, member_chunk: usize) -> Vec<CommandFrame> {
    let chunk = member_chunk.max(1);
    let mut frames = vec![CommandFrame::new("DEL", vec![key.to_vec()])];
    match &snapshot.value {
        StoredValue::String(value) => {
            frames.push(CommandFrame::new("SET", vec![key.to_vec(), value.clone()]));
        }
        StoredValue::List(items) => {
            let items = items.iter().cloned().collect::<Vec<_>>();
            push_chunked(&mut frames, "RPUSH", key, items, chunk, 1);
        }
        StoredValue::Set(members) => {
            let members = members.iter().cloned().collect::<Vec<_>>();
            push_chunked(&mut frames, "SADD", key, members, chunk, 1);
        }
        StoredValue::Hash(fields) => {
            let args = fields
                .iter()
                .flat_map(|(field, value)| [field.clone(), value.clone()])
                .collect::<Vec<_>>();
            push_chunked(&mut frames, "HSET", key, args, chunk, 2);
        }
        StoredValue::ZSet(zset) => {
            let args = zset
                .ordered()
                .into_iter()
                .flat_map(|(member, score)| [format_score(score).into_bytes(), member.to_vec()])
                .collect::<Vec<_>>();
            push_chunked(&mut frames, "ZADD", key, args, chunk, 2);
        }
    }
    if let Some(ttl_ms) = snapshot.ttl_ms {
        frames.push(CommandFrame::new(
            "PEXPIRE",
            vec![key.to_vec(), ttl_ms.max(1).to_string().into_bytes()],
        ));
    }
    frames
}

/// Appends `name key <args...>` commands carrying at most `chunk` members each.
///
/// `width` is the number of arguments forming one member (two for field/value pairs).
fn push_chunked(
    frames: &mut Vec<CommandFrame>,
    name: &str,
    key: &[u8],
    args: Vec<Vec<u8>>,
    chunk: usize,
    width: usize,
) {
    for members in args.chunks(chunk * width) {
        let mut command_args = Vec::with_capacity(members.len() + 1);
        command_args.push(key.to_vec());
        command_args.extend_from_slice(members);
        frames.push(CommandFrame::new(name, command_args));
    }
}

/// Moves one key: read it from the store, write its commands, and (unless pipelined) wait for
/// every acknowledgement.
///
/// # Errors
///
/// Returns `MigrateKeyError::Key` when the store read fails or the destination rejects a
/// command, and `MigrateKeyError::Connection` when the link breaks.
pub fn migrate_one_key(
    connection: &mut DestinationConnection,
    store: &dyn SlotStore,
    pending: &PendingKey,
    options: MigrateOptions,
) -> Result<KeyOutcome, MigrateKeyError> {
    let snapshot = store
        .get_typed(&pending.key, pending.data_type)
        .map_err(|error| MigrateKeyError::Key(error.to_string()))?;
    let Some(snapshot) = snapshot else {
        return Ok(KeyOutcome::Absent);
    };

    let frames = serialize_key(&pending.key, &snapshot, options.member_chunk);
    connection
        .send(&frames)
        .map_err(MigrateKeyError::Connection)?;
    if options.pipelined {
        return Ok(KeyOutcome::Sent {
            replies: frames.len(),
        });
    }
    collect_replies(connection, frames.len())?;
    Ok(KeyOutcome::Transferred)
}

/// Reads `expected` replies for one key.
///
/// Every reply is consumed even after an error so the stream stays aligned for the next key.
///
/// # Errors
///
/// Returns the first error reply as `MigrateKeyError::Key`, or `MigrateKeyError::Connection`
/// when a reply cannot be read.
pub fn collect_replies(
    connection: &mut DestinationConnection,
    expected: usize,
) -> Result<(), MigrateKeyError> {
    let mut first_error = None;
    for _ in 0..expected {
        let reply = connection.read_reply().map_err(|error| {
            if error.is_connection_level() {
                MigrateKeyError::Connection(error)
            } else {
                MigrateKeyError::Connection(SmError::Connection(error.to_string()))
            }
        })?;
        if let CommandReply::Error(message) = reply
            && first_error.is_none()
        {
            first_error = Some(message);
        }
    }
    first_error.map_or(Ok(()), |message| Err(MigrateKeyError::Key(message)))
}

#[cfg(test)]
mod tests {
    use super::serialize_key;
    use googletest::prelude::*;
    use rstest::rstest;
    use slotmig_core::command::CommandFrame;
    use slotmig_core::containers::{HotMap, HotSet};
    use slotmig_core::value::{StoredValue, ZSetValue};
    use slotmig_storage::KeySnapshot;
    use std::collections::VecDeque;

    fn names(frames: &[CommandFrame]) -> Vec<&str> {
        frames.iter().map(|frame| frame.name.as_str()).collect()
    }

    #[rstest]
    fn string_with_ttl_is_replaced_then_expired() {
        let snapshot = KeySnapshot {
            value: StoredValue::String(b"v".to_vec()),
            ttl_ms: Some(1500),
        };
        let frames = serialize_key(b"k", &snapshot, 512);
        assert_that!(&names(&frames), eq(&vec!["DEL", "SET", "PEXPIRE"]));
        assert_that!(&frames[1].args, eq(&vec![b"k".to_vec(), b"v".to_vec()]));
        assert_that!(&frames[2].args[1], eq(&b"1500".to_vec()));
    }

    #[rstest]
    fn list_is_chunked_in_order() {
        let items = (0..5)
            .map(|index| format!("i{index}").into_bytes())
            .collect::<VecDeque<_>>();
        let snapshot = KeySnapshot {
            value: StoredValue::List(items),
            ttl_ms: None,
        };
        let frames = serialize_key(b"l", &snapshot, 2);
        assert_that!(&names(&frames), eq(&vec!["DEL", "RPUSH", "RPUSH", "RPUSH"]));
        assert_that!(
            &frames[1].args,
            eq(&vec![b"l".to_vec(), b"i0".to_vec(), b"i1".to_vec()])
        );
        assert_that!(&frames[3].args, eq(&vec![b"l".to_vec(), b"i4".to_vec()]));
    }

    #[rstest]
    fn hash_chunks_count_pairs_not_arguments() {
        let mut fields = HotMap::new();
        for index in 0..3 {
            let _ = fields.insert(
                format!("f{index}").into_bytes(),
                format!("v{index}").into_bytes(),
            );
        }
        let snapshot = KeySnapshot {
            value: StoredValue::Hash(fields),
            ttl_ms: None,
        };
        let frames = serialize_key(b"h", &snapshot, 2);
        assert_that!(&names(&frames), eq(&vec!["DEL", "HSET", "HSET"]));
        assert_that!(frames[1].args.len(), eq(5_usize));
        assert_that!(frames[2].args.len(), eq(3_usize));
    }

    #[rstest]
    fn zset_sends_score_member_pairs() {
        let mut zset = ZSetValue::default();
        let _ = zset.insert(b"m".to_vec(), 1.5);
        let snapshot = KeySnapshot {
            value: StoredValue::ZSet(zset),
            ttl_ms: None,
        };
        let frames = serialize_key(b"z", &snapshot, 512);
        assert_that!(
            &frames[1],
            eq(&CommandFrame::new(
                "ZADD",
                vec![b"z".to_vec(), b"1.5".to_vec(), b"m".to_vec()]
            ))
        );
    }

    #[rstest]
    fn set_members_all_appear_once() {
        let mut members = HotSet::new();
        for member in [b"a", b"b", b"c"] {
            let _ = members.insert(member.to_vec());
        }
        let snapshot = KeySnapshot {
            value: StoredValue::Set(members),
            ttl_ms: None,
        };
        let frames = serialize_key(b"s", &snapshot, 512);
        assert_that!(&names(&frames), eq(&vec!["DEL", "SADD"]));
        let mut sent = frames[1].args[1..].to_vec();
        sent.sort();
        assert_that!(&sent, eq(&vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]));
    }
}
