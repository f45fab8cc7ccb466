//! Scalar value parsers shared by the set-functions
// (c) 2024 Ross Younger
//!
//! These implement the OpenSSH client's quirky literal rules: octal
//! integers with a leading zero, durations with unit suffixes, byte counts
//! with binary multipliers.

use std::time::Duration;

use crate::errors::{Error, Result};

/// Parses a yes/no style boolean. `true`/`false` are accepted as aliases.
pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" => Ok(true),
        "no" | "false" => Ok(false),
        _ => Err(Error::invalid(key, format!("expected yes or no, found {value:?}"))),
    }
}

/// Parses an integer, honoring the leading-zero octal rule.
pub(crate) fn parse_i64(key: &str, value: &str) -> Result<i64> {
    let (digits, radix) = if value.len() > 1 && value.starts_with('0') && !value.starts_with("0x") {
        (&value[1..], 8)
    } else {
        (value, 10)
    };
    i64::from_str_radix(digits, radix)
        .map_err(|_| Error::invalid(key, format!("not a valid number: {value:?}")))
}

/// Parses an unsigned integer, octal when the literal has a leading zero.
pub(crate) fn parse_u32(key: &str, value: &str) -> Result<u32> {
    let n = parse_i64(key, value)?;
    u32::try_from(n).map_err(|_| Error::invalid(key, format!("out of range: {value:?}")))
}

/// Parses a signed integer (ports, key-size minimums).
pub(crate) fn parse_i32(key: &str, value: &str) -> Result<i32> {
    let n = parse_i64(key, value)?;
    i32::try_from(n).map_err(|_| Error::invalid(key, format!("out of range: {value:?}")))
}

/// Parses a TCP port number, range 1-65535.
pub(crate) fn parse_port(key: &str, value: &str) -> Result<i32> {
    let n = parse_i32(key, value)?;
    if (1..=65535).contains(&n) {
        Ok(n)
    } else {
        Err(Error::invalid(key, format!("port out of range: {value}")))
    }
}

/// Parses a duration: whole numbers with optional unit suffixes, compound
/// forms allowed (`1h30m`). A bare number is seconds; `none` is zero.
pub(crate) fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(Duration::ZERO);
    }
    let mut normalised = value.to_ascii_lowercase();
    if normalised.ends_with(|c: char| c.is_ascii_digit()) {
        normalised.push('s');
    }
    let mut total = 0u64;
    let mut digits = String::new();
    for ch in normalised.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        if digits.is_empty() {
            return Err(Error::invalid(key, format!("invalid duration: {value:?}")));
        }
        let n: u64 = digits
            .parse()
            .map_err(|_| Error::invalid(key, format!("invalid duration: {value:?}")))?;
        let scale = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            'w' => 604_800,
            _ => return Err(Error::invalid(key, format!("invalid time unit in {value:?}"))),
        };
        total = total
            .checked_add(n.saturating_mul(scale))
            .ok_or_else(|| Error::invalid(key, format!("duration overflow: {value:?}")))?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(Error::invalid(key, format!("invalid duration: {value:?}")));
    }
    Ok(Duration::from_secs(total))
}

/// Parses a byte count with an optional `K`/`M`/`G` binary multiplier suffix.
pub(crate) fn parse_size(key: &str, value: &str) -> Result<u64> {
    let (digits, scale) = match value.chars().last() {
        Some('k' | 'K') => (&value[..value.len() - 1], 1u64 << 10),
        Some('m' | 'M') => (&value[..value.len() - 1], 1u64 << 20),
        Some('g' | 'G') => (&value[..value.len() - 1], 1u64 << 30),
        _ => (value, 1),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| Error::invalid(key, format!("not a valid size: {value:?}")))?;
    n.checked_mul(scale)
        .ok_or_else(|| Error::invalid(key, format!("size overflow: {value:?}")))
}

/// The DSCP/precedence tokens accepted by `IPQoS`.
pub(crate) fn parse_qos_token(key: &str, value: &str) -> Result<String> {
    const NAMED: &[&str] = &[
        "af11", "af12", "af13", "af21", "af22", "af23", "af31", "af32", "af33", "af41", "af42",
        "af43", "cs0", "cs1", "cs2", "cs3", "cs4", "cs5", "cs6", "cs7", "ef", "le", "lowdelay",
        "throughput", "reliability", "none",
    ];
    let lower = value.to_ascii_lowercase();
    if NAMED.contains(&lower.as_str()) {
        return Ok(lower);
    }
    // a raw DSCP value is also accepted
    match parse_i64(key, value) {
        Ok(n) if (0..=255).contains(&n) => Ok(lower),
        _ => Err(Error::invalid(key, format!("unknown IPQoS class {value:?}"))),
    }
}

///////////////////////////////////////////////////////////////////////////////////////
