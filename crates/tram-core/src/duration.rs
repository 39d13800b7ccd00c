//! Duration parsing for TTL configuration.
//!
//! TTLs arrive either as bare numbers (unit implied by the tier they apply
//! to: hours for HOT, days for WARM/COLD) or as suffixed strings with
//! `s|m|h|d` components that may be compounded (`1d12h`, `4h30m`). Everything
//! canonicalizes to milliseconds.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MS_PER_SECOND: i64 = 1_000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Unit applied to bare numeric TTL values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpliedUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl ImpliedUnit {
    fn millis(self) -> i64 {
        match self {
            ImpliedUnit::Seconds => MS_PER_SECOND,
            ImpliedUnit::Minutes => MS_PER_MINUTE,
            ImpliedUnit::Hours => MS_PER_HOUR,
            ImpliedUnit::Days => MS_PER_DAY,
        }
    }
}

/// A TTL as it appears in configuration: a bare number or a duration string.
///
/// The strings `"null"` and `"never"` mean "never demote from this tier".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TtlSpec {
    Number(f64),
    Text(String),
}

/// Parse a suffixed duration string into milliseconds.
///
/// Accepts compounded components (`1d12h`, `4h30m`), case-insensitive
/// suffixes, and fractional values (`1.5h`). Empty or malformed strings and
/// negative values are invalid input.
pub fn parse_duration_ms(input: &str) -> Result<i64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("empty duration".to_string()));
    }
    if trimmed.starts_with('-') {
        return Err(Error::InvalidInput(format!(
            "negative duration: {trimmed:?}"
        )));
    }

    let mut total_ms = 0f64;
    let mut number = String::new();
    let mut saw_component = false;

    for ch in trimmed.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
            continue;
        }
        let unit_ms = match ch.to_ascii_lowercase() {
            's' => MS_PER_SECOND,
            'm' => MS_PER_MINUTE,
            'h' => MS_PER_HOUR,
            'd' => MS_PER_DAY,
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown duration suffix {other:?} in {trimmed:?}"
                )));
            }
        };
        if number.is_empty() {
            return Err(Error::InvalidInput(format!(
                "duration suffix without value in {trimmed:?}"
            )));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| Error::InvalidInput(format!("bad duration value in {trimmed:?}")))?;
        total_ms += value * unit_ms as f64;
        number.clear();
        saw_component = true;
    }

    if !number.is_empty() {
        return Err(Error::InvalidInput(format!(
            "duration value without suffix in {trimmed:?}"
        )));
    }
    if !saw_component {
        return Err(Error::InvalidInput(format!("unparseable duration: {trimmed:?}")));
    }

    Ok(total_ms.round() as i64)
}

/// Resolve a configured TTL to milliseconds.
///
/// Returns `Ok(None)` for the explicit "never demote" values. Bare numbers
/// take `implied` as their unit; strings go through [`parse_duration_ms`].
pub fn ttl_ms(spec: &TtlSpec, implied: ImpliedUnit) -> Result<Option<i64>> {
    match spec {
        TtlSpec::Number(n) => {
            if *n < 0.0 {
                return Err(Error::InvalidInput(format!("negative TTL: {n}")));
            }
            Ok(Some((n * implied.millis() as f64).round() as i64))
        }
        TtlSpec::Text(s) => {
            let lowered = s.trim().to_ascii_lowercase();
            if lowered == "null" || lowered == "never" {
                return Ok(None);
            }
            parse_duration_ms(s).map(Some)
        }
    }
}
