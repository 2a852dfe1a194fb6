//! Schema-driven validation of open configuration maps
//!
//! Every transport plugin describes its settings with a JSON-Schema-like
//! object (`type: object`, `properties`, `required`). `validate_by_schema`
//! checks a settings map against that description:
//!
//! 1. every `required` field is present;
//! 2. every field present in both the map and `properties` has the declared
//!    type (`string`, `number`, `integer`, `boolean`, `array`, `object`);
//! 3. declared constraints hold: `minLength`/`maxLength`, `minimum`/`maximum`,
//!    `enum`, `pattern`, and recursive `items` / nested `properties`.
//!
//! Fields the schema does not describe are accepted.

use crate::core::Settings;
use crate::error::DispatchError;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};
use thiserror::Error;

/// A validation failure naming the offending field.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("field `{field}`: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<ValidationError> for DispatchError {
    fn from(err: ValidationError) -> Self {
        DispatchError::Config {
            field: err.field,
            reason: err.reason,
        }
    }
}

/// Validates `config` against `schema`.
pub fn validate_by_schema(config: &Settings, schema: &Value) -> Result<(), ValidationError> {
    validate_object(config, schema, "")
}

fn validate_object(config: &Map<String, Value>, schema: &Value, prefix: &str) -> Result<(), ValidationError> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if config.get(field).map_or(true, Value::is_null) {
                return Err(ValidationError::new(
                    join_path(prefix, field),
                    "required field is missing",
                ));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (field, field_schema) in properties {
        let Some(value) = config.get(field) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        validate_value(value, field_schema, &join_path(prefix, field))?;
    }
    Ok(())
}

fn validate_value(value: &Value, schema: &Value, path: &str) -> Result<(), ValidationError> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !matches_type(value, expected) {
            return Err(ValidationError::new(
                path,
                format!("expected type {}, got {}", expected, type_name(value)),
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.iter().any(|candidate| candidate == value) {
            let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
            return Err(ValidationError::new(
                path,
                format!("value {} is not one of [{}]", value, options.join(", ")),
            ));
        }
    }

    match value {
        Value::String(s) => check_string(s, schema, path)?,
        Value::Number(_) => check_range(value, schema, path)?,
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_value(item, item_schema, &format!("{}[{}]", path, i))?;
                }
            }
        }
        Value::Object(map) => {
            if schema.get("properties").is_some() || schema.get("required").is_some() {
                validate_object(map, schema, path)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn pattern_cache() -> &'static RwLock<HashMap<String, Regex>> {
    static PATTERNS: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();
    PATTERNS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Compiles `pattern` once; schemas are static, so the cache stays small.
fn compiled_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    if let Some(re) = pattern_cache()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(pattern)
    {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    pattern_cache()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(pattern.to_string(), re.clone());
    Ok(re)
}

fn check_string(s: &str, schema: &Value, path: &str) -> Result<(), ValidationError> {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if len < min {
            return Err(ValidationError::new(
                path,
                format!("length {} is shorter than minimum {}", len, min),
            ));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            return Err(ValidationError::new(
                path,
                format!("length {} exceeds maximum {}", len, max),
            ));
        }
    }
    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        let re = compiled_pattern(pattern)
            .map_err(|e| ValidationError::new(path, format!("invalid schema pattern: {}", e)))?;
        if !re.is_match(s) {
            return Err(ValidationError::new(
                path,
                format!("value does not match pattern {}", pattern),
            ));
        }
    }
    Ok(())
}

fn check_range(value: &Value, schema: &Value, path: &str) -> Result<(), ValidationError> {
    let Some(n) = value.as_f64() else {
        return Ok(());
    };
    if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
        if n < min {
            return Err(ValidationError::new(
                path,
                format!("value {} is less than minimum {}", value, min),
            ));
        }
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
        if n > max {
            return Err(ValidationError::new(
                path,
                format!("value {} is greater than maximum {}", value, max),
            ));
        }
    }
    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        },
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        // Unknown schema types do not constrain the value.
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}

/// Typed accessors over validated settings.
///
/// These assume `validate_by_schema` already ran, so a wrong type is treated
/// like an absent value.
pub mod settings {
    use crate::core::Settings;
    use serde_json::Value;

    pub fn str<'a>(settings: &'a Settings, key: &str) -> Option<&'a str> {
        settings.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    pub fn u64(settings: &Settings, key: &str) -> Option<u64> {
        settings.get(key).and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        })
    }

    pub fn bool(settings: &Settings, key: &str) -> Option<bool> {
        settings.get(key).and_then(Value::as_bool)
    }

    pub fn strings(settings: &Settings, key: &str) -> Vec<String> {
        settings
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
