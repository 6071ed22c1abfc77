//! Strict parsing of limit arguments
//!
//! Limit arguments follow C numeric literal rules: `0x`/`0X` selects
//! hexadecimal, a leading `0` selects octal, anything else is decimal.
//! [`parse_prefix`] consumes the longest valid prefix and reports where it
//! stopped; [`parse_number`] additionally requires that nothing is left over.

use crate::error::{Result, TetherError};

/// Longest numeric prefix of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    /// Parsed magnitude, saturated at `u64::MAX` on overflow.
    pub value: u64,
    /// Byte offset just past the last consumed character, 0 if no digit was consumed.
    pub end: usize,
    /// The digits did not fit in 64 bits.
    pub overflowed: bool,
}

/// Parse the longest unsigned integer prefix of `text` with automatic base detection.
pub fn parse_prefix(text: &str) -> Prefix {
    let bytes = text.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() && is_c_space(bytes[pos]) {
        pos += 1;
    }
    if pos < bytes.len() && bytes[pos] == b'+' {
        pos += 1;
    }

    let radix = if bytes.get(pos) == Some(&b'0')
        && matches!(bytes.get(pos + 1), Some(b'x' | b'X'))
        && bytes.get(pos + 2).is_some_and(u8::is_ascii_hexdigit)
    {
        pos += 2;
        16
    } else if bytes.get(pos) == Some(&b'0') {
        8
    } else {
        10
    };

    let start = pos;
    let mut value: u64 = 0;
    let mut overflowed = false;
    while let Some(digit) = bytes.get(pos).and_then(|&b| (b as char).to_digit(radix)) {
        match value
            .checked_mul(u64::from(radix))
            .and_then(|v| v.checked_add(u64::from(digit)))
        {
            Some(next) => value = next,
            None => {
                value = u64::MAX;
                overflowed = true;
            }
        }
        pos += 1;
    }

    if pos == start {
        return Prefix {
            value: 0,
            end: 0,
            overflowed: false,
        };
    }

    Prefix {
        value,
        end: pos,
        overflowed,
    }
}

/// Parse a whole token as an unsigned magnitude.
///
/// Fails with [`TetherError::InvalidNumber`] carrying the offending text when
/// the token has no digits, trailing characters, or does not fit in 64 bits.
pub fn parse_number(text: &str) -> Result<u64> {
    let prefix = parse_prefix(text);
    if prefix.end == 0 || prefix.end != text.len() || prefix.overflowed {
        return Err(TetherError::InvalidNumber {
            text: text.to_string(),
        });
    }
    Ok(prefix.value)
}

fn is_c_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\x0b' | b'\x0c' | b'\r')
}
