//! Data command table and execution against the keyspace.
//!
//! A frame is resolved through the [`CommandTable`] into one [`DataCommand`] variant, which is
//! then applied to the keyspace. Write variants are journaled by the caller (`Db`).

mod command_spec;
mod data_command;
mod handlers_collections;
mod handlers_keyspace;
mod parse_numbers;
mod registry;

pub use command_spec::{CommandArity, CommandParser, CommandSpec};
pub use data_command::DataCommand;
pub use registry::CommandTable;

use slotmig_core::command::CommandReply;

use crate::keyspace::Keyspace;
use handlers_collections as coll;
use handlers_keyspace as ks;

/// Applies one parsed command to the keyspace and builds its reply.
#[must_use]
pub fn apply(command: &DataCommand, keyspace: &mut Keyspace) -> CommandReply {
    match command {
        DataCommand::Ping(message) => ks::handle_ping(message.as_ref()),
        DataCommand::Echo(message) => CommandReply::BulkString(message.clone()),
        DataCommand::Set {
            key,
            value,
            expire_ms,
        } => ks::handle_set(keyspace, key, value, *expire_ms),
        DataCommand::Get(key) => ks::handle_get(keyspace, key),
        DataCommand::Del(keys) => ks::handle_del(keyspace, keys),
        DataCommand::Exists(keys) => ks::handle_exists(keyspace, keys),
        DataCommand::Type(key) => ks::handle_type(keyspace, key),
        DataCommand::Expire { key, millis } => ks::handle_expire(keyspace, key, *millis),
        DataCommand::Ttl { key, millis } => ks::handle_ttl(keyspace, key, *millis),
        DataCommand::Persist(key) => ks::handle_persist(keyspace, key),
        DataCommand::Push { key, values, left } => coll::handle_push(keyspace, key, values, *left),
        DataCommand::LRange { key, start, stop } => {
            coll::handle_lrange(keyspace, key, *start, *stop)
        }
        DataCommand::LLen(key) => coll::handle_llen(keyspace, key),
        DataCommand::SAdd { key, members } => coll::handle_sadd(keyspace, key, members),
        DataCommand::SRem { key, members } => coll::handle_srem(keyspace, key, members),
        DataCommand::SMembers(key) => coll::handle_smembers(keyspace, key),
        DataCommand::SCard(key) => coll::handle_scard(keyspace, key),
        DataCommand::SIsMember { key, member } => coll::handle_sismember(keyspace, key, member),
        DataCommand::HSet { key, pairs } => coll::handle_hset(keyspace, key, pairs),
        DataCommand::HGet { key, field } => coll::handle_hget(keyspace, key, field),
        DataCommand::HDel { key, fields } => coll::handle_hdel(keyspace, key, fields),
        DataCommand::HGetAll(key) => coll::handle_hgetall(keyspace, key),
        DataCommand::HLen(key) => coll::handle_hlen(keyspace, key),
        DataCommand::ZAdd { key, entries } => coll::handle_zadd(keyspace, key, entries),
        DataCommand::ZScore { key, member } => coll::handle_zscore(keyspace, key, member),
        DataCommand::ZCard(key) => coll::handle_zcard(keyspace, key),
        DataCommand::ZRange {
            key,
            start,
            stop,
            with_scores,
        } => coll::handle_zrange(keyspace, key, *start, *stop, *with_scores),
    }
}
