use slotmig_common::error::SmResult;
use slotmig_core::command::CommandReply;
use slotmig_core::value::{DataType, StoredValue, format_score};

use super::parse_numbers::normalize_range;
use crate::keyspace::Keyspace;

fn count_reply(count: usize) -> CommandReply {
    CommandReply::Integer(i64::try_from(count).unwrap_or(i64::MAX))
}

fn error_reply(error: &slotmig_common::error::SmError) -> CommandReply {
    CommandReply::Error(error.to_string())
}

fn bulk_array<'a>(items: impl Iterator<Item = &'a Vec<u8>>) -> CommandReply {
    CommandReply::Array(items.map(|item| CommandReply::BulkString(item.clone())).collect())
}

/// Runs a read-only closure against a value of the expected type.
fn read_typed(
    keyspace: &mut Keyspace,
    key: &[u8],
    data_type: DataType,
    missing: CommandReply,
    read: impl FnOnce(&StoredValue) -> CommandReply,
) -> CommandReply {
    match keyspace.get_typed(key, data_type) {
        Ok(Some(value)) => read(value),
        Ok(None) => missing,
        Err(error) => error_reply(&error),
    }
}

/// Runs a mutating closure against an existing value, dropping the key if it becomes empty.
fn remove_members(
    keyspace: &mut Keyspace,
    key: &[u8],
    data_type: DataType,
    remove: impl FnOnce(&mut StoredValue) -> usize,
) -> CommandReply {
    let removed = match keyspace.existing_for_write(key, data_type) {
        Ok(Some(value)) => remove(value),
        Ok(None) => 0,
        Err(error) => return error_reply(&error),
    };
    keyspace.remove_if_empty(key);
    count_reply(removed)
}

pub(super) fn handle_push(
    keyspace: &mut Keyspace,
    key: &[u8],
    values: &[Vec<u8>],
    left: bool,
) -> CommandReply {
    let result: SmResult<usize> = keyspace
        .value_for_write(key, DataType::List)
        .map(|value| {
            let StoredValue::List(items) = value else {
                return 0;
            };
            for item in values {
                if left {
                    items.push_front(item.clone());
                } else {
                    items.push_back(item.clone());
                }
            }
            items.len()
        });
    match result {
        Ok(len) => count_reply(len),
        Err(error) => error_reply(&error),
    }
}

pub(super) fn handle_lrange(keyspace: &mut Keyspace, key: &[u8], start: i64, stop: i64) -> CommandReply {
    read_typed(
        keyspace,
        key,
        DataType::List,
        CommandReply::Array(Vec::new()),
        |value| {
            let StoredValue::List(items) = value else {
                return CommandReply::Array(Vec::new());
            };
            match normalize_range(start, stop, items.len()) {
                Some((from, to)) => bulk_array(items.range(from..=to)),
                None => CommandReply::Array(Vec::new()),
            }
        },
    )
}

pub(super) fn handle_llen(keyspace: &mut Keyspace, key: &[u8]) -> CommandReply {
    read_typed(keyspace, key, DataType::List, CommandReply::Integer(0), |value| {
        match value {
            StoredValue::List(items) => count_reply(items.len()),
            _ => CommandReply::Integer(0),
        }
    })
}

pub(super) fn handle_sadd(keyspace: &mut Keyspace, key: &[u8], members: &[Vec<u8>]) -> CommandReply {
    match keyspace.value_for_write(key, DataType::Set) {
        Ok(StoredValue::Set(set)) => count_reply(
            members
                .iter()
                .filter(|member| set.insert((*member).clone()))
                .count(),
        ),
        Ok(_) => CommandReply::Integer(0),
        Err(error) => error_reply(&error),
    }
}

pub(super) fn handle_srem(keyspace: &mut Keyspace, key: &[u8], members: &[Vec<u8>]) -> CommandReply {
    remove_members(keyspace, key, DataType::Set, |value| match value {
        StoredValue::Set(set) => members.iter().filter(|member| set.remove(*member)).count(),
        _ => 0,
    })
}

pub(super) fn handle_smembers(keyspace: &mut Keyspace, key: &[u8]) -> CommandReply {
    read_typed(
        keyspace,
        key,
        DataType::Set,
        CommandReply::Array(Vec::new()),
        |value| match value {
            StoredValue::Set(set) => {
                let mut members = set.iter().collect::<Vec<_>>();
                members.sort();
                bulk_array(members.into_iter())
            }
            _ => CommandReply::Array(Vec::new()),
        },
    )
}

pub(super) fn handle_scard(keyspace: &mut Keyspace, key: &[u8]) -> CommandReply {
    read_typed(keyspace, key, DataType::Set, CommandReply::Integer(0), |value| {
        match value {
            StoredValue::Set(set) => count_reply(set.len()),
            _ => CommandReply::Integer(0),
        }
    })
}

pub(super) fn handle_sismember(keyspace: &mut Keyspace, key: &[u8], member: &[u8]) -> CommandReply {
    read_typed(keyspace, key, DataType::Set, CommandReply::Integer(0), |value| {
        match value {
            StoredValue::Set(set) => CommandReply::Integer(i64::from(set.contains(member))),
            _ => CommandReply::Integer(0),
        }
    })
}

pub(super) fn handle_hset(
    keyspace: &mut Keyspace,
    key: &[u8],
    pairs: &[(Vec<u8>, Vec<u8>)],
) -> CommandReply {
    match keyspace.value_for_write(key, DataType::Hash) {
        Ok(StoredValue::Hash(fields)) => count_reply(
            pairs
                .iter()
                .filter(|(field, value)| fields.insert(field.clone(), value.clone()).is_none())
                .count(),
        ),
        Ok(_) => CommandReply::Integer(0),
        Err(error) => error_reply(&error),
    }
}

pub(super) fn handle_hget(keyspace: &mut Keyspace, key: &[u8], field: &[u8]) -> CommandReply {
    read_typed(keyspace, key, DataType::Hash, CommandReply::Null, |value| {
        match value {
            StoredValue::Hash(fields) => fields
                .get(field)
                .map_or(CommandReply::Null, |found| CommandReply::BulkString(found.clone())),
            _ => CommandReply::Null,
        }
    })
}

pub(super) fn handle_hdel(keyspace: &mut Keyspace, key: &[u8], fields: &[Vec<u8>]) -> CommandReply {
    remove_members(keyspace, key, DataType::Hash, |value| match value {
        StoredValue::Hash(map) => fields
            .iter()
            .filter(|field| map.remove(field.as_slice()).is_some())
            .count(),
        _ => 0,
    })
}

pub(super) fn handle_hgetall(keyspace: &mut Keyspace, key: &[u8]) -> CommandReply {
    read_typed(
        keyspace,
        key,
        DataType::Hash,
        CommandReply::Array(Vec::new()),
        |value| match value {
            StoredValue::Hash(fields) => {
                let mut pairs = fields.iter().collect::<Vec<_>>();
                pairs.sort();
                CommandReply::Array(
                    pairs
                        .into_iter()
                        .flat_map(|(field, value)| {
                            [
                                CommandReply::BulkString(field.clone()),
                                CommandReply::BulkString(value.clone()),
                            ]
                        })
                        .collect(),
                )
            }
            _ => CommandReply::Array(Vec::new()),
        },
    )
}

pub(super) fn handle_hlen(keyspace: &mut Keyspace, key: &[u8]) -> CommandReply {
    read_typed(keyspace, key, DataType::Hash, CommandReply::Integer(0), |value| {
        match value {
            StoredValue::Hash(fields) => count_reply(fields.len()),
            _ => CommandReply::Integer(0),
        }
    })
}

pub(super) fn handle_zadd(
    keyspace: &mut Keyspace,
    key: &[u8],
    entries: &[(f64, Vec<u8>)],
) -> CommandReply {
    match keyspace.value_for_write(key, DataType::ZSet) {
        Ok(StoredValue::ZSet(zset)) => count_reply(
            entries
                .iter()
                .filter(|(score, member)| zset.insert(member.clone(), *score))
                .count(),
        ),
        Ok(_) => CommandReply::Integer(0),
        Err(error) => error_reply(&error),
    }
}

pub(super) fn handle_zscore(keyspace: &mut Keyspace, key: &[u8], member: &[u8]) -> CommandReply {
    read_typed(keyspace, key, DataType::ZSet, CommandReply::Null, |value| {
        match value {
            StoredValue::ZSet(zset) => zset.score(member).map_or(CommandReply::Null, |score| {
                CommandReply::BulkString(format_score(score).into_bytes())
            }),
            _ => CommandReply::Null,
        }
    })
}

pub(super) fn handle_zcard(keyspace: &mut Keyspace, key: &[u8]) -> CommandReply {
    read_typed(keyspace, key, DataType::ZSet, CommandReply::Integer(0), |value| {
        match value {
            StoredValue::ZSet(zset) => count_reply(zset.len()),
            _ => CommandReply::Integer(0),
        }
    })
}

pub(super) fn handle_zrange(
    keyspace: &mut Keyspace,
    key: &[u8],
    start: i64,
    stop: i64,
    with_scores: bool,
) -> CommandReply {
    read_typed(
        keyspace,
        key,
        DataType::ZSet,
        CommandReply::Array(Vec::new()),
        |value| {
            let StoredValue::ZSet(zset) = value else {
                return CommandReply::Array(Vec::new());
            };
            let ordered = zset.ordered();
            let Some((from, to)) = normalize_range(start, stop, ordered.len()) else {
                return CommandReply::Array(Vec::new());
            };
            let mut reply = Vec::new();
            for (member, score) in &ordered[from..=to] {
                reply.push(CommandReply::BulkString(member.to_vec()));
                if with_scores {
                    reply.push(CommandReply::BulkString(format_score(*score).into_bytes()));
                }
            }
            CommandReply::Array(reply)
        },
    )
}
