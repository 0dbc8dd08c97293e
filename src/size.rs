//! Number literals as accepted on the command line, and human-readable sizes.
//!
//! Literals follow C's base auto-detection: `0x`/`0X` selects hexadecimal, `0b`/`0B` binary, a
//! leading `0` octal and anything else decimal. Byte sizes may end with one of `K M G T P E`
//! (either case), each a power of 1024.

use core::fmt;

use crate::error::GrammarError;

const SUFFIXES: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

fn split_radix(literal: &str) -> (u32, &str) {
    let bytes = literal.as_bytes();
    if bytes.len() > 2 && bytes[0] == b'0' {
        match bytes[1] {
            b'x' | b'X' => return (16, &literal[2..]),
            b'b' | b'B' => return (2, &literal[2..]),
            _ => (),
        }
    }
    if bytes.len() > 1 && bytes[0] == b'0' && bytes[1].is_ascii_digit() {
        return (8, &literal[1..]);
    }
    (10, literal)
}

/// Splits `digits` into its leading run of valid digits for `radix` and whatever follows.
fn split_digits(digits: &str, radix: u32) -> (&str, &str) {
    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_digit(radix))
        .map_or(digits.len(), |(i, _)| i);
    digits.split_at(end)
}

fn parse_radix(literal: &str, allow_suffix: bool) -> Result<u64, GrammarError> {
    let invalid = || GrammarError::InvalidNumber(literal.to_owned());
    let (radix, body) = split_radix(literal);
    let (digits, rest) = split_digits(body, radix);
    if digits.is_empty() {
        return Err(invalid());
    }
    let value = u64::from_str_radix(digits, radix).map_err(|e| {
        if *e.kind() == core::num::IntErrorKind::PosOverflow {
            GrammarError::NumberOverflow(literal.to_owned())
        } else {
            invalid()
        }
    })?;
    if rest.is_empty() {
        return Ok(value);
    }
    if !allow_suffix {
        return Err(invalid());
    }
    let mut chars = rest.chars();
    let suffix = chars.next().map(|c| c.to_ascii_uppercase());
    if chars.next().is_some() {
        return Err(invalid());
    }
    let power = suffix
        .and_then(|s| SUFFIXES.iter().position(|&k| k == s))
        .ok_or_else(invalid)?;
    1024u64
        .checked_pow(power as u32 + 1)
        .and_then(|multiplier| value.checked_mul(multiplier))
        .ok_or_else(|| GrammarError::NumberOverflow(literal.to_owned()))
}

/// Parses an unsigned byte size such as `0x1000`, `512K` or `2g`.
pub fn parse_size(literal: &str) -> Result<u64, GrammarError> {
    parse_radix(literal, true)
}

/// Parses a plain unsigned 32-bit integer, without size suffix.
pub fn parse_u32(literal: &str) -> Result<u32, GrammarError> {
    let value = parse_radix(literal, false)?;
    u32::try_from(value).map_err(|_| GrammarError::NumberOverflow(literal.to_owned()))
}

/// Parses a signed integer with an optional leading `+` or `-`, without size suffix.
pub fn parse_i64(literal: &str) -> Result<i64, GrammarError> {
    let overflow = || GrammarError::NumberOverflow(literal.to_owned());
    let (negative, body) = match literal.as_bytes().first() {
        Some(b'-') => (true, &literal[1..]),
        Some(b'+') => (false, &literal[1..]),
        _ => (false, literal),
    };
    let magnitude = parse_radix(body, false).map_err(|e| match e {
        GrammarError::InvalidNumber(_) => GrammarError::InvalidNumber(literal.to_owned()),
        _ => overflow(),
    })?;
    if negative {
        if magnitude == i64::MIN.unsigned_abs() {
            Ok(i64::MIN)
        } else {
            i64::try_from(magnitude).map(|v| -v).map_err(|_| overflow())
        }
    } else {
        i64::try_from(magnitude).map_err(|_| overflow())
    }
}

/// Rounds `value` up to a multiple of `alignment`, `None` on overflow. An alignment of 0 leaves
/// `value` as is.
pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    match value.checked_rem(alignment).unwrap_or(0) {
        0 => Some(value),
        rem => value.checked_add(alignment - rem),
    }
}

/// Rounds `value` down to a multiple of `alignment`.
pub fn align_down(value: u64, alignment: u64) -> u64 {
    value - value.checked_rem(alignment).unwrap_or(0)
}

/// Scales `size` down by 1024 until it is below 1024, returning the value and its unit suffix.
pub fn human_size(size: u64) -> (f64, char) {
    const UNITS: [char; 9] = ['B', 'K', 'M', 'G', 'T', 'P', 'E', 'Z', 'Y'];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    (value, UNITS[unit])
}

/// Shortest exact literal for `size` that [`parse_size`] reads back, e.g. `36M`.
pub fn size_literal(size: u64) -> String {
    if size == 0 {
        return "0".to_owned();
    }
    let mut value = size;
    let mut unit = None;
    for &suffix in SUFFIXES.iter() {
        if value % 1024 != 0 {
            break;
        }
        value /= 1024;
        unit = Some(suffix);
    }
    match unit {
        Some(suffix) => format!("{}{}", value, suffix),
        None => value.to_string(),
    }
}

/// Displays a byte count the way reports print it, e.g. `   4.00M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanSize(pub u64);

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (value, unit) = human_size(self.0);
        write!(f, "{:7.2}{}", value, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radix_detection() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("0x1000"), Ok(4096));
        assert_eq!(parse_size("0X1000"), Ok(4096));
        assert_eq!(parse_size("0b101"), Ok(5));
        assert_eq!(parse_size("010"), Ok(8));
        assert_eq!(parse_size("0"), Ok(0));
    }

    #[test]
    fn suffixes_are_powers_of_1024() {
        assert_eq!(parse_size("4K"), Ok(4096));
        assert_eq!(parse_size("4k"), Ok(4096));
        assert_eq!(parse_size("2G"), Ok(2 << 30));
        assert_eq!(parse_size("0x10M"), Ok(16 << 20));
        assert_eq!(parse_size("1E"), Ok(1 << 60));
        assert_eq!(parse_size("0K"), Ok(0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_size(""), Err(GrammarError::InvalidNumber(_))));
        assert!(matches!(parse_size("12Q"), Err(GrammarError::InvalidNumber(_))));
        assert!(matches!(parse_size("12KB"), Err(GrammarError::InvalidNumber(_))));
        assert!(matches!(parse_size("0x"), Err(GrammarError::InvalidNumber(_))));
        assert!(matches!(parse_u32("4K"), Err(GrammarError::InvalidNumber(_))));
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(matches!(parse_size("16E"), Err(GrammarError::NumberOverflow(_))));
        assert!(matches!(
            parse_size("18446744073709551616"),
            Err(GrammarError::NumberOverflow(_))
        ));
        assert!(matches!(parse_u32("0x100000000"), Err(GrammarError::NumberOverflow(_))));
    }

    #[test]
    fn signed_literals() {
        assert_eq!(parse_i64("-1"), Ok(-1));
        assert_eq!(parse_i64("+0x10"), Ok(16));
        assert_eq!(parse_i64("3"), Ok(3));
        assert_eq!(parse_i64("-9223372036854775808"), Ok(i64::MIN));
        assert!(matches!(parse_i64("-"), Err(GrammarError::InvalidNumber(_))));
    }

    #[test]
    fn alignment() {
        assert_eq!(align_up(1, 4096), Some(4096));
        assert_eq!(align_up(8192, 4096), Some(8192));
        assert_eq!(align_up(u64::MAX, 4096), None);
        assert_eq!(align_down(8191, 4096), 4096);
        assert_eq!(align_up(8191, 0), Some(8191));
    }

    #[test]
    fn human_readable() {
        assert_eq!(human_size(512), (512.0, 'B'));
        assert_eq!(human_size(4 << 20), (4.0, 'M'));
        assert_eq!(HumanSize(0x80_0000).to_string(), "   8.00M");
    }

    #[test]
    fn exact_literals_parse_back() {
        assert_eq!(size_literal(0), "0");
        assert_eq!(size_literal(36 << 20), "36M");
        assert_eq!(size_literal(0x1800), "6K");
        assert_eq!(size_literal(1000), "1000");
        assert_eq!(size_literal(u64::MAX), u64::MAX.to_string());
        for size in [4096u64, 3 << 30, 0x4c0_0000, 123] {
            assert_eq!(parse_size(&size_literal(size)), Ok(size));
        }
    }
}
