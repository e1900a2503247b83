//! Redis-compatible key to hash-slot mapping.

use slotmig_common::ids::{MAX_SLOT_ID, SlotId};

/// CRC16/XMODEM as used by Redis Cluster key hashing.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 == 0 {
                crc << 1
            } else {
                (crc << 1) ^ 0x1021
            };
        }
    }
    crc
}

/// Returns the hash slot owning `key`.
///
/// When the key contains a non-empty `{tag}`, only the tag is hashed so related keys can be
/// placed in one slot.
#[must_use]
pub fn key_slot(key: &[u8]) -> SlotId {
    crc16(hash_tag(key)) & MAX_SLOT_ID
}

fn hash_tag(key: &[u8]) -> &[u8] {
    let Some(open) = key.iter().position(|byte| *byte == b'{') else {
        return key;
    };
    let Some(close) = key[open + 1..].iter().position(|byte| *byte == b'}') else {
        return key;
    };
    if close == 0 {
        return key;
    }
    &key[open + 1..open + 1 + close]
}
