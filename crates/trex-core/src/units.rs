//! Parsing of the quantities the generator prints in its human-readable output.
//!
//! Rates are printed as a two-decimal number, a space and a one-character binary prefix
//! (`"12.34 M"`), where a blank prefix means no scaling.

use std::num::{ParseFloatError, ParseIntError};

/// Scale between two consecutive prefixes.
const BIN_SCALE: f64 = 1024.0;

/// Prefixes in increasing order of magnitude, starting from no prefix.
const PREFIXES: [char; 6] = [' ', 'K', 'M', 'G', 'T', 'P'];

/// Parses a decimal value with an optional binary prefix suffix, e.g. `"1.50 K"` is `1536.0`.
pub fn parse_prefixed(s: &str) -> Result<f64, UnitError> {
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    let value = number
        .parse::<f64>()
        .map_err(|e| UnitError::InvalidNumber(s.to_owned(), e))?;
    // Prefixes are case-sensitive: a lowercase `m` would be milli, not mega.
    let mut chars = suffix.trim().chars();
    let prefix = match (chars.next(), chars.next()) {
        (None, _) => ' ',
        (Some(c), None) => c,
        _ => return Err(UnitError::UnknownPrefix(s.to_owned())),
    };
    let pow = PREFIXES
        .iter()
        .position(|&c| c == prefix)
        .ok_or_else(|| UnitError::UnknownPrefix(s.to_owned()))?;
    Ok(value * BIN_SCALE.powi(pow as i32))
}

/// Parses a plain decimal counter.
pub fn parse_count(s: &str) -> Result<u64, UnitError> {
    s.trim()
        .parse()
        .map_err(|e| UnitError::InvalidCount(s.to_owned(), e))
}

/// Parses a plain floating-point value (durations in seconds).
pub fn parse_secs(s: &str) -> Result<f64, UnitError> {
    s.trim()
        .parse()
        .map_err(|e| UnitError::InvalidNumber(s.to_owned(), e))
}

/// Error parsing a generator quantity.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    /// The numeric part is malformed.
    #[error("invalid number in {0:?}")]
    InvalidNumber(String, #[source] ParseFloatError),

    /// The counter is not a decimal integer.
    #[error("invalid counter {0:?}")]
    InvalidCount(String, #[source] ParseIntError),

    /// The suffix is not one of the known prefixes.
    #[error("unknown unit prefix in {0:?}")]
    UnknownPrefix(String),
}
