//! Property-type value coercion.
//!
//! Each property type may carry a converter; [`convert`] looks it up and
//! applies it. Types without a converter pass values through untouched, so
//! adding a new property type never breaks existing data. Converters are
//! idempotent: feeding a converted value back in returns it unchanged.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Number, Value};
use thiserror::Error;

use crate::metadata::types::{FieldMetadata, PropertyType};

const TRUE_VALUES: [&str; 4] = ["true", "yes", "y", "1"];
const FALSE_VALUES: [&str; 4] = ["false", "no", "n", "0"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ConversionError(pub String);

fn cannot_convert(value: &Value, target: &str) -> ConversionError {
    ConversionError(format!("Cannot convert {value} to {target}"))
}

/// Coerces `value` to the representation `property_type` stores.
///
/// Unknown or converter-less types return the value unchanged. `null` is
/// never converted.
pub fn convert(value: &Value, property_type: PropertyType) -> Result<Value, ConversionError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match property_type {
        PropertyType::Boolean => to_bool(value).map(Value::Bool),
        PropertyType::Integer => to_int(value).map(|v| json!(v)),
        PropertyType::Float | PropertyType::Decimal | PropertyType::Timestamp => {
            to_float(value).and_then(|v| {
                Number::from_f64(v)
                    .map(Value::Number)
                    .ok_or_else(|| cannot_convert(value, "float"))
            })
        }
        PropertyType::Currency => to_currency(value).map(Value::String),
        PropertyType::Date => to_date(value).map(Value::String),
        PropertyType::DateTime => to_datetime(value).map(Value::String),
        PropertyType::String | PropertyType::Text => Ok(Value::String(to_string(value))),
        // No converter registered; stored as-is.
        _ => Ok(value.clone()),
    }
}

/// Lossless string form: strings stay themselves, other values JSON-encode.
pub fn maybe_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Inverse of [`maybe_to_string`]: strings that parse as JSON decode, other
/// values pass through.
pub fn maybe_from_string(value: &Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

pub fn to_string(value: &Value) -> String {
    maybe_to_string(value)
}

pub fn to_bool(value: &Value) -> Result<bool, ConversionError> {
    if let Value::Bool(b) = value {
        return Ok(*b);
    }
    let text = maybe_to_string(value).to_lowercase();
    if TRUE_VALUES.contains(&text.as_str()) {
        Ok(true)
    } else if FALSE_VALUES.contains(&text.as_str()) {
        Ok(false)
    } else {
        Err(cannot_convert(value, "bool"))
    }
}

pub fn to_int(value: &Value) -> Result<i64, ConversionError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Ok(f as i64)
                } else {
                    Err(cannot_convert(value, "int"))
                }
            } else {
                Err(cannot_convert(value, "int"))
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| cannot_convert(value, "int")),
        _ => Err(cannot_convert(value, "int")),
    }
}

pub fn to_float(value: &Value) -> Result<f64, ConversionError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| cannot_convert(value, "float")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| cannot_convert(value, "float")),
        _ => Err(cannot_convert(value, "float")),
    }
}

/// Strips non-numeric characters and renders with two decimal places.
/// Garbage input falls back to `"0.00"` rather than erroring.
pub fn to_currency(value: &Value) -> Result<String, ConversionError> {
    let raw = maybe_to_string(value);
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    let amount = cleaned.parse::<f64>().unwrap_or(0.0);
    // Half-up rounding to cents.
    let cents = (amount * 100.0 + if amount >= 0.0 { 0.5 } else { -0.5 }).trunc() / 100.0;
    Ok(format!("{cents:.2}"))
}

/// Normalizes to an ISO `YYYY-MM-DD` string.
pub fn to_date(value: &Value) -> Result<String, ConversionError> {
    let text = match value {
        Value::String(s) if !s.trim().is_empty() => s.trim(),
        _ => return Err(cannot_convert(value, "date")),
    };
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date.format("%Y-%m-%d").to_string());
    }
    // Datetime input truncates to its date component.
    to_naive_datetime(text)
        .map(|dt| dt.date().format("%Y-%m-%d").to_string())
        .ok_or_else(|| cannot_convert(value, "date"))
}

/// Normalizes to an RFC 3339 UTC string with a trailing `Z`.
pub fn to_datetime(value: &Value) -> Result<String, ConversionError> {
    let text = match value {
        Value::String(s) if !s.trim().is_empty() => s.trim(),
        _ => return Err(cannot_convert(value, "datetime")),
    };
    to_naive_datetime(text)
        .map(|dt| format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S")))
        .ok_or_else(|| cannot_convert(value, "datetime"))
}

fn to_naive_datetime(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim_end_matches(['Z', 'z']);
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Coerced default values for a set of field declarations.
///
/// A default that fails coercion is skipped silently; a bad default must not
/// break reads of existing entities.
pub fn default_values(fields: &[FieldMetadata]) -> serde_json::Map<String, Value> {
    let mut defaults = serde_json::Map::new();
    for field in fields {
        let raw = match &field.default_value {
            Some(v) if !v.is_empty() => v,
            _ => continue,
        };
        // String-ish types take the raw text; others decode JSON first so
        // "5" can become the number 5.
        let source = match field.property_type {
            PropertyType::Generic | PropertyType::String | PropertyType::Text => {
                Value::String(raw.clone())
            }
            _ => maybe_from_string(&Value::String(raw.clone())),
        };
        match convert(&source, field.property_type) {
            Ok(Value::Null) => {}
            Ok(coerced) => {
                defaults.insert(field.name.clone(), coerced);
            }
            Err(error) => {
                log::debug!(
                    "skipping default for {}: {} ({})",
                    field.name,
                    raw,
                    error
                );
            }
        }
    }
    defaults
}
