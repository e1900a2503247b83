use slotmig_common::ids::{SlotId, slot_from_i64};
use slotmig_core::command::{CommandFrame, CommandReply};
use slotmig_core::slot::key_slot;
use slotmig_storage::SlotStore;

use super::NodeApp;

impl NodeApp {
    pub(super) fn execute_cluster(&self, frame: &CommandFrame) -> CommandReply {
        let Some(subcommand_raw) = frame.args.first() else {
            return CommandReply::Error(
                "wrong number of arguments for 'CLUSTER' command".to_owned(),
            );
        };
        let Ok(subcommand) = std::str::from_utf8(subcommand_raw) else {
            return CommandReply::Error("CLUSTER subcommand must be valid UTF-8".to_owned());
        };

        match subcommand.to_ascii_uppercase().as_str() {
            "COUNTKEYSINSLOT" => self.execute_cluster_countkeysinslot(frame),
            "GETKEYSINSLOT" => self.execute_cluster_getkeysinslot(frame),
            "KEYSLOT" => Self::execute_cluster_keyslot(frame),
            _ => CommandReply::Error(format!("unknown CLUSTER subcommand '{subcommand}'")),
        }
    }

    fn execute_cluster_keyslot(frame: &CommandFrame) -> CommandReply {
        if frame.args.len() != 2 {
            return CommandReply::Error(
                "wrong number of arguments for 'CLUSTER KEYSLOT' command".to_owned(),
            );
        }
        CommandReply::Integer(i64::from(key_slot(&frame.args[1])))
    }

    fn execute_cluster_getkeysinslot(&self, frame: &CommandFrame) -> CommandReply {
        if frame.args.len() != 3 {
            return CommandReply::Error(
                "wrong number of arguments for 'CLUSTER GETKEYSINSLOT' command".to_owned(),
            );
        }
        let slot = match parse_slot(&frame.args[1]) {
            Ok(slot) => slot,
            Err(reply) => return reply,
        };
        let Some(limit) = std::str::from_utf8(&frame.args[2])
            .ok()
            .and_then(|text| text.parse::<usize>().ok())
        else {
            return CommandReply::Error("value is not an integer or out of range".to_owned());
        };

        CommandReply::Array(
            self.db
                .keys_in_slot(slot, limit)
                .into_iter()
                .map(CommandReply::BulkString)
                .collect(),
        )
    }

    fn execute_cluster_countkeysinslot(&self, frame: &CommandFrame) -> CommandReply {
        if frame.args.len() != 2 {
            return CommandReply::Error(
                "wrong number of arguments for 'CLUSTER COUNTKEYSINSLOT' command".to_owned(),
            );
        }
        let slot = match parse_slot(&frame.args[1]) {
            Ok(slot) => slot,
            Err(reply) => return reply,
        };
        let count = self.db.count_slot_keys(slot);
        CommandReply::Integer(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

fn parse_slot(raw: &[u8]) -> Result<SlotId, CommandReply> {
    let Some(value) = std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
    else {
        return Err(CommandReply::Error(
            "value is not an integer or out of range".to_owned(),
        ));
    };
    slot_from_i64(value).ok_or_else(|| CommandReply::Error("slot is out of range".to_owned()))
}
