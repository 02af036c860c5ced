use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Maximum nesting depth accepted in event details. Anything deeper is
/// almost certainly a cyclic or runaway structure, not audit data.
pub const MAX_NESTING_DEPTH: usize = 32;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("event details must serialize to a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("event details nested deeper than {MAX_NESTING_DEPTH} levels")]
    NestingTooDeep,
    #[error("failed to serialize event details: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Normalizes caller-provided details into the storage and broker safe
/// form: a JSON object tree of bounded depth where every leaf is a
/// scalar. Dates and enums are reduced to their serialized scalar
/// representation by serde, nested objects are kept as objects, and
/// sequence elements pass through unchanged. Normalizing an already
/// normalized map returns an equal map.
pub fn normalize<T: Serialize>(details: &T) -> Result<Map<String, Value>, PayloadError> {
    let value = serde_json::to_value(details)?;
    match value {
        Value::Object(map) => {
            ensure_depth(map.values(), 1)?;
            Ok(map)
        }
        other => Err(PayloadError::NotAnObject(json_type_name(&other))),
    }
}

fn ensure_depth<'a>(
    values: impl Iterator<Item = &'a Value>,
    depth: usize,
) -> Result<(), PayloadError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(PayloadError::NestingTooDeep);
    }
    for value in values {
        match value {
            Value::Object(map) => ensure_depth(map.values(), depth + 1)?,
            Value::Array(items) => ensure_depth(items.iter(), depth + 1)?,
            _ => {}
        }
    }
    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
