//! Flat source records and the value coercions applied when they are
//! read into canonical attributes.
//!
//! Coercion never guesses: a value that does not parse is treated as missing.

use serde_json::{Map, Number, Value};

/// A flat attribute record as produced by an adapter's loader.
pub type Record = Map<String, Value>;

const MPH_TO_KMH: f64 = 1.609_344;
const KNOT_TO_KMH: f64 = 1.852;
const FOOT_TO_M: f64 = 0.3048;
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Reads a plain number, or the first entry of a `;`-separated list.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_finite(first_token(s)?),
        Value::Array(items) => items.iter().find_map(as_number),
        _ => None,
    }
}

/// Reads a non-negative whole number. `1.0` reads as `1`; `1.5` is missing.
pub fn as_count(value: &Value) -> Option<u32> {
    let n = as_number(value)?;
    if n < 0.0 || n.fract() != 0.0 || n > f64::from(u32::MAX) {
        return None;
    }
    Some(n as u32)
}

/// Reads a speed in km/h, honoring `mph` and `knots` suffixes.
pub fn as_speed_kmh(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => {
            let token = first_token(s)?.to_ascii_lowercase();
            let (number, factor) = if let Some(rest) = token.strip_suffix("mph") {
                (rest, MPH_TO_KMH)
            } else if let Some(rest) = token.strip_suffix("knots") {
                (rest, KNOT_TO_KMH)
            } else if let Some(rest) = token.strip_suffix("km/h") {
                (rest, 1.0)
            } else if let Some(rest) = token.strip_suffix("kmh") {
                (rest, 1.0)
            } else {
                (token.as_str(), 1.0)
            };
            parse_finite(number).map(|v| v * factor)
        }
        Value::Array(items) => items.iter().find_map(as_speed_kmh),
        other => as_number(other),
    }
}

/// Reads a length in meters, honoring `m`, `ft` and feet/inch (`12'6"`) notations.
pub fn as_meters(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => {
            let token = first_token(s)?.to_ascii_lowercase();
            if let Some((feet, inches)) = token.split_once('\'') {
                let feet = parse_finite(feet)?;
                let inches = inches.trim_end_matches('"').trim();
                let inches = if inches.is_empty() { 0.0 } else { parse_finite(inches)? };
                return Some((feet + inches / 12.0) * FOOT_TO_M);
            }
            if let Some(rest) = token.strip_suffix("ft") {
                return parse_finite(rest).map(|v| v * FOOT_TO_M);
            }
            let number = token.strip_suffix('m').unwrap_or(&token);
            parse_finite(number)
        }
        Value::Array(items) => items.iter().find_map(as_meters),
        other => as_number(other),
    }
}

/// Reads a boolean from JSON booleans, numbers or OSM-style tokens.
pub fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 0.0 => Some(false),
            Some(v) if v == 1.0 || v == -1.0 => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" | "-1" | "y" | "t" | "reverse" => Some(true),
            "no" | "false" | "0" | "n" | "f" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Reads a text value; empty strings and the literal `nan`/`none` are missing.
pub fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => number_text(n),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => return items.iter().find_map(as_text),
        _ => return None,
    };
    match text.to_ascii_lowercase().as_str() {
        "" | "nan" | "none" | "null" => None,
        _ => Some(text),
    }
}

/// Reads a categorical token: first entry of a list, lower-cased.
pub fn as_category(value: &Value) -> Option<String> {
    let text = as_text(value)?;
    first_token(&text).map(|t| t.to_ascii_lowercase())
}

/// Whole floats print without a fraction, so DBF code `6.0` reads as `"6"`.
fn number_text(n: &Number) -> String {
    match n.as_f64() {
        Some(v) if n.is_f64() && v.fract() == 0.0 && v.abs() < MAX_EXACT_INT => {
            format!("{}", v as i64)
        }
        _ => n.to_string(),
    }
}

/// Equality where numbers compare by value (`1` equals `1.0`).
pub fn values_match(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

fn first_token(s: &str) -> Option<&str> {
    s.split(';').map(str::trim).find(|t| !t.is_empty())
}

fn parse_finite(s: &str) -> Option<f64> {
    s.trim().replace(',', ".").parse::<f64>().ok().filter(|v| v.is_finite())
}
