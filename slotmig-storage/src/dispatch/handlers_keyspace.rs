use slotmig_core::command::CommandReply;
use slotmig_core::value::{DataType, StoredValue};

use crate::keyspace::{Keyspace, ValueEntry, now_unix_millis};

fn count_reply(count: usize) -> CommandReply {
    CommandReply::Integer(i64::try_from(count).unwrap_or(i64::MAX))
}

pub(super) fn handle_ping(message: Option<&Vec<u8>>) -> CommandReply {
    message.map_or_else(
        || CommandReply::SimpleString("PONG".to_owned()),
        |message| CommandReply::BulkString(message.clone()),
    )
}

pub(super) fn handle_set(
    keyspace: &mut Keyspace,
    key: &[u8],
    value: &[u8],
    expire_ms: Option<u64>,
) -> CommandReply {
    let mut entry = ValueEntry::new(StoredValue::String(value.to_vec()));
    entry.expire_at_ms = expire_ms.map(|delta| now_unix_millis().saturating_add(delta));
    let _ = keyspace.insert(key.to_vec(), entry);
    CommandReply::ok()
}

pub(super) fn handle_get(keyspace: &mut Keyspace, key: &[u8]) -> CommandReply {
    match keyspace.get_typed(key, DataType::String) {
        Ok(Some(StoredValue::String(value))) => CommandReply::BulkString(value.clone()),
        Ok(_) => CommandReply::Null,
        Err(error) => CommandReply::Error(error.to_string()),
    }
}

pub(super) fn handle_del(keyspace: &mut Keyspace, keys: &[Vec<u8>]) -> CommandReply {
    let mut removed = 0;
    for key in keys {
        if keyspace.get(key).is_some() && keyspace.remove(key).is_some() {
            removed += 1;
        }
    }
    count_reply(removed)
}

pub(super) fn handle_exists(keyspace: &mut Keyspace, keys: &[Vec<u8>]) -> CommandReply {
    let mut present = 0;
    for key in keys {
        if keyspace.get(key).is_some() {
            present += 1;
        }
    }
    count_reply(present)
}

pub(super) fn handle_type(keyspace: &mut Keyspace, key: &[u8]) -> CommandReply {
    let name = keyspace.key_type(key).map_or("none", DataType::name);
    CommandReply::SimpleString(name.to_owned())
}

pub(super) fn handle_expire(keyspace: &mut Keyspace, key: &[u8], millis: i64) -> CommandReply {
    if keyspace.get(key).is_none() {
        return CommandReply::Integer(0);
    }
    let Ok(delta) = u64::try_from(millis) else {
        let _ = keyspace.remove(key);
        return CommandReply::Integer(1);
    };
    if delta == 0 {
        let _ = keyspace.remove(key);
        return CommandReply::Integer(1);
    }
    let expire_at = now_unix_millis().saturating_add(delta);
    CommandReply::Integer(i64::from(keyspace.set_expire_at(key, Some(expire_at))))
}

pub(super) fn handle_ttl(keyspace: &mut Keyspace, key: &[u8], millis: bool) -> CommandReply {
    match keyspace.ttl_millis(key) {
        None => CommandReply::Integer(-2),
        Some(None) => CommandReply::Integer(-1),
        Some(Some(remaining)) => {
            let reported = if millis {
                remaining
            } else {
                remaining.saturating_add(500) / 1000
            };
            CommandReply::Integer(i64::try_from(reported).unwrap_or(i64::MAX))
        }
    }
}

pub(super) fn handle_persist(keyspace: &mut Keyspace, key: &[u8]) -> CommandReply {
    match keyspace.ttl_millis(key) {
        Some(Some(_)) => CommandReply::Integer(i64::from(keyspace.set_expire_at(key, None))),
        _ => CommandReply::Integer(0),
    }
}
