use std::str;

pub(super) fn parse_i64(payload: &[u8]) -> Result<i64, String> {
    str::from_utf8(payload)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| "value is not an integer or out of range".to_owned())
}

/// Resolves Redis-style inclusive `[start, end]` indexes (negative counts from the tail).
pub(super) fn normalize_range(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i64 = i64::try_from(len).unwrap_or(i64::MAX);
    let start = if start < 0 {
        len_i64.saturating_add(start).max(0)
    } else {
        start
    };
    let mut end = if end < 0 {
        len_i64.saturating_add(end)
    } else {
        end
    };
    if end < 0 || start >= len_i64 {
        return None;
    }
    if end >= len_i64 {
        end = len_i64 - 1;
    }
    if start > end {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(end).ok()?))
}

#[cfg(test)]
mod tests {
    use super::{normalize_range, parse_i64};
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, -1, 3, Some((0, 2)))]
    #[case(-2, -1, 3, Some((1, 2)))]
    #[case(1, 10, 3, Some((1, 2)))]
    #[case(5, 6, 3, None)]
    #[case(2, 1, 3, None)]
    #[case(0, -1, 0, None)]
    fn range_normalization_matches_redis(
        #[case] start: i64,
        #[case] end: i64,
        #[case] len: usize,
        #[case] expected: Option<(usize, usize)>,
    ) {
        assert_that!(normalize_range(start, end, len), eq(expected));
    }

    #[rstest]
    fn integer_parse_rejects_text() {
        assert_that!(&parse_i64(b"12"), eq(&Ok::<i64, String>(12)));
        assert_that!(parse_i64(b"x").is_err(), eq(true));
    }
}
