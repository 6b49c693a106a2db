//! Conversion between JSON values and stored attribute values.
//!
//! Floats are never converted from their binary value: the shortest
//! round-trip string of the float is parsed as a decimal, so `4.8` is stored
//! as exactly `4.8`. Decoding goes back through the decimal's string form for
//! the same reason.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};

use crate::attribute::{AttributeValue, Item};
use crate::error::CodecError;

/// Build an exact decimal from a float's canonical string form.
pub fn decimal_from_f64(value: f64) -> Result<Decimal, CodecError> {
    if !value.is_finite() {
        return Err(CodecError::UnrepresentableNumber(value.to_string()));
    }
    let canonical = value.to_string();
    Decimal::from_str(&canonical).map_err(|_| CodecError::UnrepresentableNumber(canonical))
}

/// Exact decimal for any JSON number.
pub fn decimal_from_number(number: &Number) -> Result<Decimal, CodecError> {
    if let Some(i) = number.as_i64() {
        return Ok(Decimal::from(i));
    }
    if let Some(u) = number.as_u64() {
        return Ok(Decimal::from(u));
    }
    match number.as_f64() {
        Some(f) => decimal_from_f64(f),
        None => Err(CodecError::UnrepresentableNumber(number.to_string())),
    }
}

/// JSON number for a stored decimal. Whole numbers that fit `i64` stay integers.
pub fn number_from_decimal(decimal: &Decimal) -> Result<Number, CodecError> {
    if decimal.scale() == 0 {
        if let Ok(i) = i64::try_from(decimal.mantissa()) {
            return Ok(Number::from(i));
        }
    }

    f64_from_decimal(decimal)
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| CodecError::NonFiniteNumber(decimal.to_string()))
}

/// Nearest float to a stored decimal, parsed from its string form.
pub fn f64_from_decimal(decimal: &Decimal) -> Result<f64, CodecError> {
    let canonical = decimal.to_string();
    match f64::from_str(&canonical) {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(CodecError::NonFiniteNumber(canonical)),
    }
}

/// Convert a JSON value to an attribute value, recursively.
pub fn encode_value(value: &Value) -> Result<AttributeValue, CodecError> {
    Ok(match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(decimal_from_number(n)?),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(
            items
                .iter()
                .map(encode_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), encode_value(v)?)))
                .collect::<Result<_, CodecError>>()?,
        ),
    })
}

/// Convert an attribute value back to JSON, recursively.
pub fn decode_value(value: &AttributeValue) -> Result<Value, CodecError> {
    Ok(match value {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::N(n) => Value::Number(number_from_decimal(n)?),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::L(items) => Value::Array(
            items
                .iter()
                .map(decode_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), decode_value(v)?)))
                .collect::<Result<Map<_, _>, CodecError>>()?,
        ),
    })
}

/// Encode a JSON object as a table item.
pub fn encode_item(value: &Value) -> Result<Item, CodecError> {
    match encode_value(value)? {
        AttributeValue::M(map) => Ok(map),
        _ => Err(CodecError::NotAnObject),
    }
}

/// Decode a table item into a JSON object.
pub fn decode_item(item: &Item) -> Result<Value, CodecError> {
    item.iter()
        .map(|(k, v)| Ok((k.clone(), decode_value(v)?)))
        .collect::<Result<Map<_, _>, CodecError>>()
        .map(Value::Object)
}

/// Null, empty strings, empty arrays and empty objects carry no content.
/// Zero and `false` do.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
