//! Lightweight period parser.
//! Supports sequences of `<number><unit>` pairs, e.g. "24h", "1h30m", "1.5s", "250ms".
//! Units: ns, us (µs), ms, s, m, h.
//!
//! No humantime dependency, the grammar is tiny.

use chrono::Duration;

/// Parse a period string into a duration.
/// Returns `None` for empty, malformed or negative input.
pub fn parse_period(period: &str) -> Option<Duration> {
    let s = period.trim();
    if s.is_empty() {
        return None;
    }
    if s == "0" {
        return Some(Duration::zero());
    }

    let mut total_nanos: i128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let (number, tail) = split_number(rest)?;
        let (unit_nanos, tail) = split_unit(tail)?;
        total_nanos = total_nanos.checked_add(scale(number, unit_nanos)?)?;
        rest = tail;
    }

    let nanos = i64::try_from(total_nanos).ok()?;
    Some(Duration::nanoseconds(nanos))
}

/// Split the leading decimal number (`"1.5"` in `"1.5h"`).
fn split_number(s: &str) -> Option<(&str, &str)> {
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    Some(s.split_at(end))
}

/// Split the unit suffix and return its size in nanoseconds.
fn split_unit(s: &str) -> Option<(i128, &str)> {
    let end = s
        .char_indices()
        .find(|(_, c)| c.is_ascii_digit() || *c == '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (unit, tail) = s.split_at(end);
    let nanos = match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        _ => return None,
    };
    Some((nanos, tail))
}

/// Multiply a decimal literal by a unit size without going through floats.
fn scale(number: &str, unit_nanos: i128) -> Option<i128> {
    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let int: i128 = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
    let mut total = int.checked_mul(unit_nanos)?;
    if !frac_part.is_empty() {
        let digits = frac_part.len().min(18) as u32;
        let frac: i128 = frac_part[..digits as usize].parse().ok()?;
        total = total.checked_add(frac * unit_nanos / 10_i128.pow(digits))?;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_units() {
        assert_eq!(parse_period("24h"), Some(Duration::hours(24)));
        assert_eq!(parse_period("90s"), Some(Duration::seconds(90)));
        assert_eq!(parse_period("250ms"), Some(Duration::milliseconds(250)));
        assert_eq!(parse_period("15m"), Some(Duration::minutes(15)));
        assert_eq!(parse_period("10us"), Some(Duration::microseconds(10)));
    }

    #[test]
    fn test_compound_and_fraction() {
        assert_eq!(parse_period("1h30m"), Some(Duration::minutes(90)));
        assert_eq!(parse_period("1.5s"), Some(Duration::milliseconds(1500)));
        assert_eq!(parse_period("2h45m30s"), Some(Duration::seconds(2 * 3600 + 45 * 60 + 30)));
    }

    #[test]
    fn test_zero() {
        assert_eq!(parse_period("0"), Some(Duration::zero()));
    }

    #[test]
    fn test_invalid() {
        assert!(parse_period("").is_none());
        assert!(parse_period("daily").is_none());
        assert!(parse_period("10").is_none());
        assert!(parse_period("h").is_none());
        assert!(parse_period("5d").is_none());
        assert!(parse_period("-5s").is_none());
    }

    #[test]
    fn test_overflowing_sum_is_rejected() {
        let max = format!("{}ns", i128::MAX);
        assert!(parse_period(&max).is_none());
        assert!(parse_period(&format!("{max}1ns")).is_none());
        assert!(parse_period("99999999999999999999999999999999999999h").is_none());
    }
}
