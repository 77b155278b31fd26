//! Duration literals used by fixed-delay schedules (`"3s"`, `"2min"`, `"1h30min"`).

use crate::error::{CoreError, Result};

/// Returned when no literal is given at all: 30 days.
pub const DEFAULT_DURATION_SECS: u64 = 60 * 60 * 24 * 30;

// Longest suffixes first so "min" is not read as "mi" + garbage.
const UNITS: [(&str, u64); 6] = [
    ("min", 60),
    ("mn", 60),
    ("mi", 60),
    ("d", 60 * 60 * 24),
    ("h", 60 * 60),
    ("s", 1),
];

/// Parse a duration literal into whole seconds.
///
/// Accepts one or more `<number><unit>` groups where unit is one of
/// `d`, `h`, `min` / `mn` / `mi`, `s`. Groups are summed and may be
/// separated by whitespace, so `"1h30min"` and `"1h 30min"` are both 5400. `None` yields [`DEFAULT_DURATION_SECS`].
pub fn parse_duration(literal: Option<&str>) -> Result<u64> {
    let Some(literal) = literal else {
        return Ok(DEFAULT_DURATION_SECS);
    };

    let invalid = || CoreError::InvalidDuration(literal.to_string());
    let mut rest = literal.trim();
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u64 = 0;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid());
        }
        let (number, tail) = rest.split_at(digits);
        let value: u64 = number.parse().map_err(|_| invalid())?;

        let (suffix, unit_secs) = UNITS
            .iter()
            .find(|(suffix, _)| tail.starts_with(suffix))
            .ok_or_else(invalid)?;

        total = value
            .checked_mul(*unit_secs)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(invalid)?;
        rest = tail[suffix.len()..].trim_start();
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_units() {
        assert_eq!(parse_duration(Some("1d")).unwrap(), 86_400);
        assert_eq!(parse_duration(Some("4h")).unwrap(), 14_400);
        assert_eq!(parse_duration(Some("2min")).unwrap(), 120);
        assert_eq!(parse_duration(Some("2mn")).unwrap(), 120);
        assert_eq!(parse_duration(Some("2mi")).unwrap(), 120);
        assert_eq!(parse_duration(Some("3s")).unwrap(), 3);
    }

    #[test]
    fn missing_literal_is_thirty_days() {
        assert_eq!(parse_duration(None).unwrap(), 2_592_000);
    }

    #[test]
    fn compound_literals_are_summed() {
        assert_eq!(parse_duration(Some("1h30min")).unwrap(), 5_400);
        assert_eq!(parse_duration(Some("1d2h3mn4s")).unwrap(), 93_784);
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(parse_duration(Some("  10s ")).unwrap(), 10);
    }

    #[test]
    fn groups_may_be_separated_by_whitespace() {
        assert_eq!(parse_duration(Some("1h 30min")).unwrap(), 5_400);
        assert_eq!(parse_duration(Some("1d  2h\t3s")).unwrap(), 93_603);
        // a number still needs its unit right after it
        assert!(parse_duration(Some("1 h")).is_err());
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "s", "10", "10x", "1m", "ten seconds", "5s!", "-3s"] {
            let err = parse_duration(Some(bad)).unwrap_err();
            assert_eq!(err.code(), "INVALID_DURATION", "{bad:?} should be rejected");
        }
    }

    #[test]
    fn rejects_overflow() {
        assert!(parse_duration(Some("99999999999999999999d")).is_err());
        assert!(parse_duration(Some("18446744073709551615d")).is_err());
    }
}
