//! Typed values held by the keyspace.

use std::collections::VecDeque;

use crate::containers::{HotMap, HotSet};

/// Data type of one key.
///
/// Each type carries a one-byte tag used wherever `(type, key)` pairs are stored compactly,
/// such as the per-slot key index and migration queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataType {
    /// Binary-safe string.
    String,
    /// Ordered list.
    List,
    /// Unordered set of unique members.
    Set,
    /// Field/value map.
    Hash,
    /// Members ordered by score.
    ZSet,
}

impl DataType {
    /// Compact one-byte tag.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::String => b'k',
            Self::List => b'l',
            Self::Set => b's',
            Self::Hash => b'h',
            Self::ZSet => b'z',
        }
    }

    /// Inverse of [`DataType::tag`].
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'k' => Some(Self::String),
            b'l' => Some(Self::List),
            b's' => Some(Self::Set),
            b'h' => Some(Self::Hash),
            b'z' => Some(Self::ZSet),
            _ => None,
        }
    }

    /// Name reported by `TYPE`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::List => "list",
            Self::Set => "set",
            Self::Hash => "hash",
            Self::ZSet => "zset",
        }
    }
}

/// Sorted-set payload: member to score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZSetValue {
    scores: HotMap<Vec<u8>, f64>,
}

impl ZSetValue {
    /// Inserts or updates one member; returns true when the member is new.
    pub fn insert(&mut self, member: Vec<u8>, score: f64) -> bool {
        self.scores.insert(member, score).is_none()
    }

    /// Returns one member's score.
    #[must_use]
    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Members ordered by `(score, member)`.
    #[must_use]
    pub fn ordered(&self) -> Vec<(&[u8], f64)> {
        let mut entries = self
            .scores
            .iter()
            .map(|(member, score)| (member.as_slice(), *score))
            .collect::<Vec<_>>();
        entries.sort_by(|left, right| left.1.total_cmp(&right.1).then(left.0.cmp(right.0)));
        entries
    }
}

/// Value stored under one key.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    /// String payload.
    String(Vec<u8>),
    /// List payload.
    List(VecDeque<Vec<u8>>),
    /// Set payload.
    Set(HotSet<Vec<u8>>),
    /// Hash payload.
    Hash(HotMap<Vec<u8>, Vec<u8>>),
    /// Sorted-set payload.
    ZSet(ZSetValue),
}

impl StoredValue {
    /// Type of this value.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::String(_) => DataType::String,
            Self::List(_) => DataType::List,
            Self::Set(_) => DataType::Set,
            Self::Hash(_) => DataType::Hash,
            Self::ZSet(_) => DataType::ZSet,
        }
    }

    /// Whether a collection value has no elements left.
    ///
    /// Empty collections are removed from the keyspace, mirroring Redis.
    #[must_use]
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Self::String(_) => false,
            Self::List(items) => items.is_empty(),
            Self::Set(members) => members.is_empty(),
            Self::Hash(fields) => fields.is_empty(),
            Self::ZSet(members) => members.is_empty(),
        }
    }
}

/// Formats a score the way Redis prints it: integral values without a fraction.
#[must_use]
pub fn format_score(score: f64) -> String {
    if score.is_infinite() {
        return if score > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    if score.fract() == 0.0 && score.abs() < 1e17 {
        #[allow(clippy::cast_possible_truncation)]
        let integral = score as i64;
        return integral.to_string();
    }
    format!("{score}")
}

/// Parses a score argument, accepting `inf`/`-inf` spellings.
#[must_use]
pub fn parse_score(raw: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(raw).ok()?;
    let score = match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other.parse::<f64>().ok()?,
    };
    if score.is_nan() { None } else { Some(score) }
}

#[cfg(test)]
mod tests {
    use super::{DataType, ZSetValue, format_score, parse_score};
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(DataType::String)]
    #[case(DataType::List)]
    #[case(DataType::Set)]
    #[case(DataType::Hash)]
    #[case(DataType::ZSet)]
    fn tag_maps_back_to_type(#[case] data_type: DataType) {
        assert_that!(DataType::from_tag(data_type.tag()), eq(Some(data_type)));
    }

    #[rstest]
    #[case(3.0, "3")]
    #[case(-2.5, "-2.5")]
    #[case(f64::INFINITY, "inf")]
    fn score_formatting_drops_integral_fraction(#[case] score: f64, #[case] expected: &str) {
        assert_that!(format_score(score), eq(expected));
    }

    #[rstest]
    fn score_parsing_rejects_nan() {
        assert_that!(parse_score(b"nan"), eq(None));
        assert_that!(parse_score(b"-inf"), eq(Some(f64::NEG_INFINITY)));
        assert_that!(parse_score(b"1.5"), eq(Some(1.5)));
    }

    #[rstest]
    fn zset_orders_by_score_then_member() {
        let mut zset = ZSetValue::default();
        let _ = zset.insert(b"b".to_vec(), 1.0);
        let _ = zset.insert(b"a".to_vec(), 1.0);
        let _ = zset.insert(b"c".to_vec(), 0.5);
        let members = zset
            .ordered()
            .into_iter()
            .map(|(member, _)| member.to_vec())
            .collect::<Vec<_>>();
        assert_that!(
            &members,
            eq(&vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()])
        );
    }
}
