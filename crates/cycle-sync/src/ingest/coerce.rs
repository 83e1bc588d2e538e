//! Lossy scalar conversions for vendor JSON values
//!
//! The vendor is inconsistent about types (numbers arrive as strings and the
//! other way round), so conversions never fail: anything unusable becomes
//! the zero value.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// String form of a scalar. Objects, arrays and null give an empty string.
pub fn to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => f.to_string(),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}

/// Integer form of a scalar; floats are truncated, booleans are 0/1.
pub fn to_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or_default(),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
                .unwrap_or_default()
        },
        Value::Bool(b) => i64::from(*b),
        Value::Null | Value::Array(_) | Value::Object(_) => 0,
    }
}

pub fn to_i32(value: &Value) -> i32 {
    i32::try_from(to_i64(value)).unwrap_or_default()
}

// ============================================================================
// Serde adapters for typed records fed from mapping output
// ============================================================================

pub fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(to_string(&Value::deserialize(deserializer)?))
}

pub fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(to_i64(&Value::deserialize(deserializer)?))
}

pub fn lenient_i32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    Ok(to_i32(&Value::deserialize(deserializer)?))
}

pub fn lenient_date<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<chrono::NaiveDate>, D::Error> {
    let raw = to_string(&Value::deserialize(deserializer)?);
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(cycle_common::types::parse_execution_date(&raw).ok())
}
