//! Decimal wire helpers - canonical parse/render for prices and quantities.
//!
//! Everything that crosses a JSON boundary goes through these two functions
//! so that a serialized decimal round-trips bit-exactly.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::core::error::{Error, Result};

/// Maximum fractional digits carried on the wire. Excess digits are truncated.
pub const MAX_FRACTIONAL_DIGITS: u32 = 18;

/// Parse a decimal string: optional sign, integer part, up to 18 fractional
/// digits. Fractional digits beyond the 18th are truncated, not rounded.
pub fn parse_decimal(input: &str) -> Result<Decimal> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::Validation("empty decimal string".into()));
    }

    let (sign, digits) = match s.as_bytes()[0] {
        b'-' => ("-", &s[1..]),
        b'+' => ("", &s[1..]),
        _ => ("", s),
    };

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(Error::Validation(format!("malformed decimal '{input}'")));
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(Error::Validation(format!("malformed decimal '{input}'")));
    }

    let frac = &frac_part[..frac_part.len().min(MAX_FRACTIONAL_DIGITS as usize)];
    let int = if int_part.is_empty() { "0" } else { int_part };

    let canonical = if frac.is_empty() {
        format!("{sign}{int}")
    } else {
        format!("{sign}{int}.{frac}")
    };

    Decimal::from_str(&canonical)
        .map_err(|e| Error::Validation(format!("malformed decimal '{input}': {e}")))
}

/// Canonical rendering: no trailing zeros, no trailing decimal point, a
/// single representation of zero, no leading '+'.
pub fn format_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_round_trip() {
        for s in ["0", "1", "-1", "1.5", "-0.25", "49900", "0.000000000000000001"] {
            let d = parse_decimal(s).unwrap();
            assert_eq!(format_decimal(d), s, "round trip of {s}");
        }
    }

    #[test]
    fn test_parse_normalizes_non_canonical_input() {
        assert_eq!(format_decimal(parse_decimal("1.50").unwrap()), "1.5");
        assert_eq!(format_decimal(parse_decimal("+7").unwrap()), "7");
        assert_eq!(format_decimal(parse_decimal("007.10").unwrap()), "7.1");
        assert_eq!(format_decimal(parse_decimal("-0.0").unwrap()), "0");
        assert_eq!(format_decimal(parse_decimal(".5").unwrap()), "0.5");
    }

    #[test]
    fn test_parse_truncates_excess_fractional_digits() {
        // 19th fractional digit dropped, not rounded
        let d = parse_decimal("0.1234567890123456789").unwrap();
        assert_eq!(format_decimal(d), "0.123456789012345678");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for s in ["", "  ", "abc", "1.2.3", "1,5", "--1", "1e5"] {
            assert!(parse_decimal(s).is_err(), "expected reject of {s:?}");
        }
    }

    #[test]
    fn test_addition_is_exact() {
        let a = parse_decimal("0.1").unwrap();
        let b = parse_decimal("0.2").unwrap();
        let c = parse_decimal("0.3").unwrap();
        assert_eq!((a + b) + c, a + (b + c));
        assert_eq!(a + b, c);
    }
}
