use slotmig_core::command::CommandFrame;
use slotmig_core::value::parse_score;

use super::parse_numbers::parse_i64;

/// One parsed data command.
///
/// The command set is closed, so each command name maps to exactly one variant holding its own
/// parsed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum DataCommand {
    /// `PING [message]`.
    Ping(Option<Vec<u8>>),
    /// `ECHO message`.
    Echo(Vec<u8>),
    /// `SET key value [EX seconds | PX milliseconds]`.
    Set {
        /// Target key.
        key: Vec<u8>,
        /// New string value.
        value: Vec<u8>,
        /// Relative expiry.
        expire_ms: Option<u64>,
    },
    /// `GET key`.
    Get(Vec<u8>),
    /// `DEL key [key ...]`.
    Del(Vec<Vec<u8>>),
    /// `EXISTS key [key ...]`.
    Exists(Vec<Vec<u8>>),
    /// `TYPE key`.
    Type(Vec<u8>),
    /// `EXPIRE key seconds` / `PEXPIRE key milliseconds`.
    Expire {
        /// Target key.
        key: Vec<u8>,
        /// Relative expiry; non-positive deletes the key.
        millis: i64,
    },
    /// `TTL key` / `PTTL key`.
    Ttl {
        /// Target key.
        key: Vec<u8>,
        /// Report milliseconds instead of seconds.
        millis: bool,
    },
    /// `PERSIST key`.
    Persist(Vec<u8>),
    /// `LPUSH` / `RPUSH key value [value ...]`.
    Push {
        /// Target key.
        key: Vec<u8>,
        /// Values in argument order.
        values: Vec<Vec<u8>>,
        /// Push at the head instead of the tail.
        left: bool,
    },
    /// `LRANGE key start stop`.
    LRange {
        /// Target key.
        key: Vec<u8>,
        /// Inclusive start index.
        start: i64,
        /// Inclusive stop index.
        stop: i64,
    },
    /// `LLEN key`.
    LLen(Vec<u8>),
    /// `SADD key member [member ...]`.
    SAdd {
        /// Target key.
        key: Vec<u8>,
        /// Members to add.
        members: Vec<Vec<u8>>,
    },
    /// `SREM key member [member ...]`.
    SRem {
        /// Target key.
        key: Vec<u8>,
        /// Members to remove.
        members: Vec<Vec<u8>>,
    },
    /// `SMEMBERS key`.
    SMembers(Vec<u8>),
    /// `SCARD key`.
    SCard(Vec<u8>),
    /// `SISMEMBER key member`.
    SIsMember {
        /// Target key.
        key: Vec<u8>,
        /// Probed member.
        member: Vec<u8>,
    },
    /// `HSET key field value [field value ...]`.
    HSet {
        /// Target key.
        key: Vec<u8>,
        /// Field/value pairs.
        pairs: Vec<(Vec<u8>, Vec<u8>)>,
    },
    /// `HGET key field`.
    HGet {
        /// Target key.
        key: Vec<u8>,
        /// Field name.
        field: Vec<u8>,
    },
    /// `HDEL key field [field ...]`.
    HDel {
        /// Target key.
        key: Vec<u8>,
        /// Fields to remove.
        fields: Vec<Vec<u8>>,
    },
    /// `HGETALL key`.
    HGetAll(Vec<u8>),
    /// `HLEN key`.
    HLen(Vec<u8>),
    /// `ZADD key score member [score member ...]`.
    ZAdd {
        /// Target key.
        key: Vec<u8>,
        /// Score/member pairs.
        entries: Vec<(f64, Vec<u8>)>,
    },
    /// `ZSCORE key member`.
    ZScore {
        /// Target key.
        key: Vec<u8>,
        /// Probed member.
        member: Vec<u8>,
    },
    /// `ZCARD key`.
    ZCard(Vec<u8>),
    /// `ZRANGE key start stop [WITHSCORES]`.
    ZRange {
        /// Target key.
        key: Vec<u8>,
        /// Inclusive start rank.
        start: i64,
        /// Inclusive stop rank.
        stop: i64,
        /// Interleave scores in the reply.
        with_scores: bool,
    },
}

impl DataCommand {
    /// Whether the command mutates the keyspace and must be journaled.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Set { .. }
                | Self::Del(_)
                | Self::Expire { .. }
                | Self::Persist(_)
                | Self::Push { .. }
                | Self::SAdd { .. }
                | Self::SRem { .. }
                | Self::HSet { .. }
                | Self::HDel { .. }
                | Self::ZAdd { .. }
        )
    }

    /// Keys a write command may change; empty for reads.
    #[must_use]
    pub fn written_keys(&self) -> Vec<&[u8]> {
        match self {
            Self::Del(keys) => keys.iter().map(Vec::as_slice).collect(),
            Self::Set { key, .. }
            | Self::Expire { key, .. }
            | Self::Persist(key)
            | Self::Push { key, .. }
            | Self::SAdd { key, .. }
            | Self::SRem { key, .. }
            | Self::HSet { key, .. }
            | Self::HDel { key, .. }
            | Self::ZAdd { key, .. } => vec![key.as_slice()],
            _ => Vec::new(),
        }
    }
}

fn first(frame: &CommandFrame) -> Vec<u8> {
    frame.args[0].clone()
}

fn rest(frame: &CommandFrame) -> Vec<Vec<u8>> {
    frame.args[1..].to_vec()
}

pub(super) fn parse_ping(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::Ping(frame.args.first().cloned()))
}

pub(super) fn parse_echo(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::Echo(first(frame)))
}

pub(super) fn parse_set(frame: &CommandFrame) -> Result<DataCommand, String> {
    let mut expire_ms = None;
    let mut options = frame.args[2..].iter();
    while let Some(option) = options.next() {
        let multiplier = match option.to_ascii_uppercase().as_slice() {
            b"EX" => 1000,
            b"PX" => 1,
            _ => return Err("syntax error".to_owned()),
        };
        let Some(amount) = options.next() else {
            return Err("syntax error".to_owned());
        };
        let amount = parse_i64(amount)?;
        if amount <= 0 {
            return Err("invalid expire time in 'SET' command".to_owned());
        }
        let amount = u64::try_from(amount).map_err(|_| "syntax error".to_owned())?;
        expire_ms = Some(amount.saturating_mul(multiplier));
    }
    Ok(DataCommand::Set {
        key: first(frame),
        value: frame.args[1].clone(),
        expire_ms,
    })
}

pub(super) fn parse_get(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::Get(first(frame)))
}

pub(super) fn parse_del(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::Del(frame.args.clone()))
}

pub(super) fn parse_exists(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::Exists(frame.args.clone()))
}

pub(super) fn parse_type(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::Type(first(frame)))
}

pub(super) fn parse_expire(frame: &CommandFrame) -> Result<DataCommand, String> {
    let seconds = parse_i64(&frame.args[1])?;
    Ok(DataCommand::Expire {
        key: first(frame),
        millis: seconds.saturating_mul(1000),
    })
}

pub(super) fn parse_pexpire(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::Expire {
        key: first(frame),
        millis: parse_i64(&frame.args[1])?,
    })
}

pub(super) fn parse_ttl(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::Ttl {
        key: first(frame),
        millis: false,
    })
}

pub(super) fn parse_pttl(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::Ttl {
        key: first(frame),
        millis: true,
    })
}

pub(super) fn parse_persist(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::Persist(first(frame)))
}

pub(super) fn parse_rpush(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::Push {
        key: first(frame),
        values: rest(frame),
        left: false,
    })
}

pub(super) fn parse_lpush(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::Push {
        key: first(frame),
        values: rest(frame),
        left: true,
    })
}

pub(super) fn parse_lrange(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::LRange {
        key: first(frame),
        start: parse_i64(&frame.args[1])?,
        stop: parse_i64(&frame.args[2])?,
    })
}

pub(super) fn parse_llen(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::LLen(first(frame)))
}

pub(super) fn parse_sadd(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::SAdd {
        key: first(frame),
        members: rest(frame),
    })
}

pub(super) fn parse_srem(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::SRem {
        key: first(frame),
        members: rest(frame),
    })
}

pub(super) fn parse_smembers(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::SMembers(first(frame)))
}

pub(super) fn parse_scard(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::SCard(first(frame)))
}

pub(super) fn parse_sismember(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::SIsMember {
        key: first(frame),
        member: frame.args[1].clone(),
    })
}

pub(super) fn parse_hset(frame: &CommandFrame) -> Result<DataCommand, String> {
    let pairs = frame.args[1..]
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    Ok(DataCommand::HSet {
        key: first(frame),
        pairs,
    })
}

pub(super) fn parse_hget(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::HGet {
        key: first(frame),
        field: frame.args[1].clone(),
    })
}

pub(super) fn parse_hdel(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::HDel {
        key: first(frame),
        fields: rest(frame),
    })
}

pub(super) fn parse_hgetall(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::HGetAll(first(frame)))
}

pub(super) fn parse_hlen(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::HLen(first(frame)))
}

pub(super) fn parse_zadd(frame: &CommandFrame) -> Result<DataCommand, String> {
    let mut entries = Vec::with_capacity(frame.args.len() / 2);
    for pair in frame.args[1..].chunks_exact(2) {
        let Some(score) = parse_score(&pair[0]) else {
            return Err("value is not a valid float".to_owned());
        };
        entries.push((score, pair[1].clone()));
    }
    Ok(DataCommand::ZAdd {
        key: first(frame),
        entries,
    })
}

pub(super) fn parse_zscore(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::ZScore {
        key: first(frame),
        member: frame.args[1].clone(),
    })
}

pub(super) fn parse_zcard(frame: &CommandFrame) -> Result<DataCommand, String> {
    Ok(DataCommand::ZCard(first(frame)))
}

pub(super) fn parse_zrange(frame: &CommandFrame) -> Result<DataCommand, String> {
    let with_scores = match frame.args.get(3) {
        None => false,
        Some(option) if option.eq_ignore_ascii_case(b"WITHSCORES") => true,
        Some(_) => return Err("syntax error".to_owned()),
    };
    if frame.args.len() > 4 {
        return Err("syntax error".to_owned());
    }
    Ok(DataCommand::ZRange {
        key: first(frame),
        start: parse_i64(&frame.args[1])?,
        stop: parse_i64(&frame.args[2])?,
        with_scores,
    })
}
