//! Heartbeat Interval Codec
//!
//! Heartbeat tokens carry the publisher's interval in a compact unit form
//! such as `"2s"`, `"1m30s"` or `"500ms"`. Consumers parse the token back to
//! derive how long a silence means the publisher is gone.

use anyhow::{Result, anyhow, bail};
use std::fmt::Write;
use std::time::Duration;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Formats a duration as a unit string (`"1h0m0s"`, `"2s"`, `"1.5s"`, `"250ms"`).
pub fn format_interval(interval: Duration) -> String {
    let nanos = interval.as_nanos();

    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < NANOS_PER_MICRO {
        return format!("{}ns", nanos);
    }
    if nanos < NANOS_PER_MILLI {
        return format!("{}µs", with_fraction(nanos, NANOS_PER_MICRO));
    }
    if nanos < NANOS_PER_SEC {
        return format!("{}ms", with_fraction(nanos, NANOS_PER_MILLI));
    }

    let total_secs = interval.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = (total_secs % 60) as u128 * NANOS_PER_SEC + interval.subsec_nanos() as u128;

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{}h", hours);
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{}m", minutes);
    }
    let _ = write!(out, "{}s", with_fraction(seconds, NANOS_PER_SEC));
    out
}

fn with_fraction(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let fraction = value % unit;
    if fraction == 0 {
        return whole.to_string();
    }

    let width = unit.ilog10() as usize;
    let digits = format!("{:0width$}", fraction, width = width);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Parses a unit string produced by [`format_interval`] (or written by hand).
///
/// Accepts a sequence of `<number><unit>` segments where the number may carry a
/// decimal fraction and the unit is one of `h`, `m`, `s`, `ms`, `us`, `µs`, `ns`.
/// A bare `"0"` is accepted; any other unit-less or negative input is rejected.
pub fn parse_interval(text: &str) -> Result<Duration> {
    let text = text.trim();
    if text.is_empty() {
        bail!("empty interval");
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = text;
    let mut total: u128 = 0;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| anyhow!("missing unit in interval {:?}", text))?;
        if number_len == 0 {
            bail!("expected a number in interval {:?}", text);
        }
        let (number, tail) = rest.split_at(number_len);

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let scale = unit_nanos(unit)
            .ok_or_else(|| anyhow!("unknown unit {:?} in interval {:?}", unit, text))?;
        total = total
            .checked_add(segment_nanos(number, scale, text)?)
            .ok_or_else(|| anyhow!("interval {:?} overflows", text))?;

        rest = tail;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC)
        .map_err(|_| anyhow!("interval {:?} overflows", text))?;
    Ok(Duration::new(secs, (total % NANOS_PER_SEC) as u32))
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3600 * NANOS_PER_SEC),
        _ => None,
    }
}

fn segment_nanos(number: &str, scale: u128, text: &str) -> Result<u128> {
    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        bail!("expected a number in interval {:?}", text);
    }
    if fraction.contains('.') {
        bail!("malformed number {:?} in interval {:?}", number, text);
    }

    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse()? };
    let mut nanos = whole
        .checked_mul(scale)
        .ok_or_else(|| anyhow!("interval {:?} overflows", text))?;

    // Digits beyond nanosecond resolution are dropped.
    let mut place = scale;
    for digit in fraction.chars() {
        place /= 10;
        if place == 0 {
            break;
        }
        nanos += digit.to_digit(10).unwrap_or(0) as u128 * place;
    }

    Ok(nanos)
}
