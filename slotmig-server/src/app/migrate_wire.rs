use std::net::IpAddr;
use std::time::Duration;

use slotmig_cluster::{Destination, MigrationStatus};
use slotmig_common::error::SmError;
use slotmig_common::ids::slot_from_i64;
use slotmig_core::command::{CommandFrame, CommandReply};

use super::NodeApp;

impl NodeApp {
    /// `SLOTSMGRTSLOT-ASYNC host port timeout_ms slot keys_num`
    pub(super) fn execute_migrate_slot(&self, frame: &CommandFrame) -> CommandReply {
        if frame.args.len() != 5 {
            return arity_error("SLOTSMGRTSLOT-ASYNC");
        }
        let destination = match self.remote_destination(&frame.args[..3]) {
            Ok(destination) => destination,
            Err(reply) => return reply,
        };
        let Some(slot) = parse_i64(&frame.args[3]).and_then(slot_from_i64) else {
            return CommandReply::Error("invalid slot number".to_owned());
        };
        let Some(keys_num) = parse_i64(&frame.args[4]).and_then(|value| usize::try_from(value).ok())
        else {
            return CommandReply::Error("invalid key count".to_owned());
        };

        match self.migration.req_migrate_batch(destination, slot, keys_num) {
            Ok(()) => CommandReply::ok(),
            Err(error) => error_reply(&error),
        }
    }

    /// `SLOTSMGRTONE-ASYNC host port timeout_ms key`
    pub(super) fn execute_migrate_one(&self, frame: &CommandFrame) -> CommandReply {
        if frame.args.len() != 4 {
            return arity_error("SLOTSMGRTONE-ASYNC");
        }
        let destination = match self.remote_destination(&frame.args[..3]) {
            Ok(destination) => destination,
            Err(reply) => return reply,
        };
        match self.migration.req_migrate_one(destination, &frame.args[3]) {
            Ok(queued) => CommandReply::Integer(i64::from(queued)),
            Err(error) => error_reply(&error),
        }
    }

    pub(super) fn execute_migrate_status(&self, frame: &CommandFrame) -> CommandReply {
        if !frame.args.is_empty() {
            return arity_error("SLOTSMGRT-ASYNC-STATUS");
        }
        status_reply(&self.migration.status())
    }

    pub(super) fn execute_migrate_cancel(&self, frame: &CommandFrame) -> CommandReply {
        if !frame.args.is_empty() {
            return arity_error("SLOTSMGRT-ASYNC-CANCEL");
        }
        let _ = self.migration.cancel();
        CommandReply::ok()
    }

    /// Parses the shared `host port timeout_ms` prefix and refuses this node's own address.
    fn remote_destination(&self, args: &[Vec<u8>]) -> Result<Destination, CommandReply> {
        let destination = parse_destination(args)?;
        if destination.port == self.config.port && is_local_host(&destination.host) {
            return Err(CommandReply::Error("destination is this node".to_owned()));
        }
        Ok(destination)
    }
}

fn is_local_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<IpAddr>()
            .is_ok_and(|address| address.is_loopback() || address.is_unspecified())
}

fn arity_error(command: &str) -> CommandReply {
    CommandReply::Error(format!("wrong number of arguments for '{command}' command"))
}

fn error_reply(error: &SmError) -> CommandReply {
    CommandReply::Error(error.to_string())
}

fn parse_i64(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse::<i64>().ok()
}

/// Parses the shared `host port timeout_ms` prefix.
fn parse_destination(args: &[Vec<u8>]) -> Result<Destination, CommandReply> {
    let Ok(host) = std::str::from_utf8(&args[0]) else {
        return Err(CommandReply::Error("host must be valid UTF-8".to_owned()));
    };
    let Some(port) = parse_i64(&args[1]).and_then(|value| u16::try_from(value).ok()) else {
        return Err(CommandReply::Error("invalid port".to_owned()));
    };
    let Some(timeout_ms) = parse_i64(&args[2])
        .and_then(|value| u64::try_from(value).ok())
        .filter(|value| *value > 0)
    else {
        return Err(CommandReply::Error("invalid timeout".to_owned()));
    };
    Ok(Destination::new(
        host,
        port,
        Duration::from_millis(timeout_ms),
    ))
}

fn bulk(text: &str) -> CommandReply {
    CommandReply::BulkString(text.as_bytes().to_vec())
}

fn counter(value: u64) -> CommandReply {
    CommandReply::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Flat name/value array, in the order clients of the async migration commands expect.
fn status_reply(status: &MigrationStatus) -> CommandReply {
    let fields = [
        (
            "dest",
            status.destination.as_deref().map_or(CommandReply::Null, bulk),
        ),
        (
            "slot",
            status
                .slot
                .map_or(CommandReply::Integer(-1), |slot| CommandReply::Integer(i64::from(slot))),
        ),
        ("migrating", CommandReply::Integer(i64::from(status.migrating))),
        ("moved", counter(status.moved)),
        (
            "remaining",
            CommandReply::Integer(i64::try_from(status.remaining).unwrap_or(i64::MAX)),
        ),
        ("phase", bulk(status.phase.as_str())),
        ("sent", counter(status.sent)),
        ("acknowledged", counter(status.acknowledged)),
        ("failed", counter(status.failed)),
        (
            "last_outcome",
            status
                .last_outcome
                .map_or(CommandReply::Null, |outcome| bulk(outcome.as_str())),
        ),
        (
            "last_error",
            status.last_error.as_deref().map_or(CommandReply::Null, bulk),
        ),
    ];
    CommandReply::Array(
        fields
            .into_iter()
            .flat_map(|(name, value)| [bulk(name), value])
            .collect(),
    )
}
