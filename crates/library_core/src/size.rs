//! crates/library_core/src/size.rs
//!
//! Parses the human-readable document sizes recorded for each book
//! (`"12,5 MB"`, `"500 KB"`) into byte counts.
//!
//! Units are decimal multiples. The arithmetic is done on the decimal digits
//! directly, so whole-byte results are exact. [`parse`] truncates anything
//! below one byte; [`parse_exact`] keeps it, for callers that add sizes up
//! before truncating.

use std::fmt;
use std::str::FromStr;

/// Digits of the fractional part that are kept.
const FRACTION_DIGITS: usize = 9;

/// Resolution of [`parse_exact`]: results count billionths of a byte.
pub const NANOS_PER_BYTE: u128 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SizeError {
    #[error("size string is empty")]
    Empty,
    #[error("size '{0}' has no unit suffix")]
    MissingUnit(String),
    #[error("size '{0}' does not start with a valid decimal number")]
    InvalidMagnitude(String),
    #[error("size '{input}' has an unrecognized unit '{unit}'")]
    UnknownUnit { input: String, unit: String },
    #[error("size '{0}' does not fit in 64 bits")]
    Overflow(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    B,
    KB,
    MB,
    GB,
}

impl SizeUnit {
    pub const fn multiplier(self) -> u64 {
        match self {
            SizeUnit::B => 1,
            SizeUnit::KB => 1_000,
            SizeUnit::MB => 1_000_000,
            SizeUnit::GB => 1_000_000_000,
        }
    }
}

impl FromStr for SizeUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [SizeUnit::B, SizeUnit::KB, SizeUnit::MB, SizeUnit::GB]
            .into_iter()
            .find(|unit| unit.to_string().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SizeUnit::B => "B",
            SizeUnit::KB => "KB",
            SizeUnit::MB => "MB",
            SizeUnit::GB => "GB",
        })
    }
}

/// Parse a size string into bytes.
///
/// Whitespace anywhere in the input is ignored and a comma is accepted as the
/// decimal separator, so `"12,5 MB"`, `"12.5mb"` and `" 1 2 . 5 M B "` are all
/// 12,500,000 bytes.
pub fn parse(size: &str) -> Result<u64, SizeError> {
    let nanos = parse_exact(size)?;
    u64::try_from(nanos / NANOS_PER_BYTE).map_err(|_| SizeError::Overflow(size.to_string()))
}

/// Parse a size string into billionths of a byte, keeping sub-byte fractions.
///
/// Accepts the same input as [`parse`], and rejects the same values as too
/// large: the whole-byte part must still fit in a `u64`.
pub fn parse_exact(size: &str) -> Result<u128, SizeError> {
    let normalized: String = size
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if normalized.is_empty() {
        return Err(SizeError::Empty);
    }
    let split = normalized
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| SizeError::MissingUnit(size.to_string()))?;
    let (magnitude, unit) = normalized.split_at(split);
    let unit = unit.parse::<SizeUnit>().map_err(|_| SizeError::UnknownUnit {
        input: size.to_string(),
        unit: unit.to_string(),
    })?;
    scale(magnitude, unit.multiplier()).map_err(|err| match err {
        ScaleError::Invalid => SizeError::InvalidMagnitude(size.to_string()),
        ScaleError::Overflow => SizeError::Overflow(size.to_string()),
    })
}

enum ScaleError {
    Invalid,
    Overflow,
}

/// Multiply a plain decimal string (ASCII digits and at most one `.`) by
/// `multiplier`, in billionths of a byte.
fn scale(magnitude: &str, multiplier: u64) -> Result<u128, ScaleError> {
    let (whole, fraction) = magnitude.split_once('.').unwrap_or((magnitude, ""));
    if fraction.contains('.') || (whole.is_empty() && fraction.is_empty()) {
        return Err(ScaleError::Invalid);
    }
    let whole = match whole {
        "" => 0,
        digits => digits.parse::<u64>().map_err(|_| ScaleError::Overflow)?,
    };

    let mut numerator = 0u128;
    for position in 0..FRACTION_DIGITS {
        let digit = fraction.as_bytes().get(position).map_or(0, |b| u128::from(b - b'0'));
        numerator = numerator * 10 + digit;
    }
    // whole < 2^64 and multiplier <= 10^9, so every term stays far below 2^128.
    let multiplier = u128::from(multiplier);
    let nanos = u128::from(whole) * multiplier * NANOS_PER_BYTE + numerator * multiplier;
    if nanos / NANOS_PER_BYTE > u128::from(u64::MAX) {
        return Err(ScaleError::Overflow);
    }
    Ok(nanos)
}
