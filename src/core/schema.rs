//! Structural contracts for task payloads
//!
//! A [`Contract`] is plain data loaded from a process definition. Validation
//! walks the payload recursively and fails closed on the first violation,
//! reporting the JSON path of the offending value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Declared shape of a payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Contract {
    /// Accepts any value
    #[default]
    Any,

    /// Only `null`
    Null,

    Boolean,

    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },

    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
    },

    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<i64>,
    },

    /// A number in `[0, 1]`
    Confidence,

    /// One of a fixed set of values
    Enum { values: Vec<Value> },

    Array {
        items: Box<Contract>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_items: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },

    Object {
        #[serde(default)]
        properties: BTreeMap<String, Contract>,
        #[serde(default)]
        required: Vec<String>,
        /// Whether fields not listed in `properties` are allowed
        #[serde(default = "default_additional")]
        additional: bool,
    },

    /// Matches if any of the variants matches (e.g. a nullable string)
    OneOf { variants: Vec<Contract> },
}

fn default_additional() -> bool {
    true
}

/// What went wrong at a given path
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    #[error("missing required field")]
    MissingField,

    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("value {value} is outside the allowed range {range}")]
    OutOfRange { value: String, range: String },

    #[error("value {value} is not one of {allowed}")]
    NotInEnum { value: String, allowed: String },

    #[error("length {length} is outside the allowed range {range}")]
    Length { length: usize, range: String },

    #[error("field is not declared by the contract")]
    UnknownField,

    #[error("value matches none of the declared variants")]
    NoVariantMatched,
}

/// A contract violation at a specific path of the payload
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{path}: {violation}")]
pub struct SchemaError {
    /// JSON path of the offending value, e.g. `$.findings[2].confidence`
    pub path: String,
    pub violation: Violation,
}

impl SchemaError {
    fn at(path: &str, violation: Violation) -> Self {
        Self {
            path: path.to_string(),
            violation,
        }
    }
}

/// Validate `payload` against `contract`
pub fn validate(contract: &Contract, payload: &Value) -> Result<(), SchemaError> {
    check(contract, payload, "$")
}

fn check(contract: &Contract, value: &Value, path: &str) -> Result<(), SchemaError> {
    match contract {
        Contract::Any => Ok(()),
        Contract::Null => expect(value.is_null(), "null", value, path),
        Contract::Boolean => expect(value.is_boolean(), "boolean", value, path),
        Contract::String {
            min_length,
            max_length,
        } => {
            let s = value
                .as_str()
                .ok_or_else(|| mismatch("string", value, path))?;
            check_length(s.chars().count(), *min_length, *max_length, path)
        }
        Contract::Number { minimum, maximum } => {
            let n = value
                .as_f64()
                .ok_or_else(|| mismatch("number", value, path))?;
            check_range(n, *minimum, *maximum, path)
        }
        Contract::Integer { minimum, maximum } => {
            let n = as_integer(value).ok_or_else(|| mismatch("integer", value, path))?;
            if minimum.is_some_and(|min| n < i128::from(min))
                || maximum.is_some_and(|max| n > i128::from(max))
            {
                return Err(SchemaError::at(
                    path,
                    Violation::OutOfRange {
                        value: n.to_string(),
                        range: describe_range(*minimum, *maximum),
                    },
                ));
            }
            Ok(())
        }
        Contract::Confidence => {
            let n = value
                .as_f64()
                .ok_or_else(|| mismatch("number", value, path))?;
            check_range(n, Some(0.0), Some(1.0), path)
        }
        Contract::Enum { values } => {
            if values.iter().any(|allowed| allowed == value) {
                Ok(())
            } else {
                Err(SchemaError::at(
                    path,
                    Violation::NotInEnum {
                        value: value.to_string(),
                        allowed: Value::Array(values.clone()).to_string(),
                    },
                ))
            }
        }
        Contract::Array {
            items,
            min_items,
            max_items,
        } => {
            let elements = value
                .as_array()
                .ok_or_else(|| mismatch("array", value, path))?;
            check_length(elements.len(), *min_items, *max_items, path)?;
            for (i, element) in elements.iter().enumerate() {
                check(items, element, &format!("{}[{}]", path, i))?;
            }
            Ok(())
        }
        Contract::Object {
            properties,
            required,
            additional,
        } => {
            let fields = value
                .as_object()
                .ok_or_else(|| mismatch("object", value, path))?;

            for name in required {
                if !fields.contains_key(name) {
                    return Err(SchemaError::at(&field_path(path, name), Violation::MissingField));
                }
            }

            // serde_json maps iterate in key order, so the first reported
            // violation is stable for a given payload
            for (name, field) in fields {
                let child = field_path(path, name);
                match properties.get(name) {
                    Some(contract) => check(contract, field, &child)?,
                    None if !additional => {
                        return Err(SchemaError::at(&child, Violation::UnknownField));
                    }
                    None => {}
                }
            }
            Ok(())
        }
        Contract::OneOf { variants } => {
            if variants.iter().any(|v| check(v, value, path).is_ok()) {
                Ok(())
            } else {
                Err(SchemaError::at(path, Violation::NoVariantMatched))
            }
        }
    }
}

fn expect(ok: bool, expected: &str, value: &Value, path: &str) -> Result<(), SchemaError> {
    if ok {
        Ok(())
    } else {
        Err(mismatch(expected, value, path))
    }
}

fn mismatch(expected: &str, value: &Value, path: &str) -> SchemaError {
    SchemaError::at(
        path,
        Violation::TypeMismatch {
            expected: expected.to_string(),
            found: type_name(value).to_string(),
        },
    )
}

fn check_range(n: f64, min: Option<f64>, max: Option<f64>, path: &str) -> Result<(), SchemaError> {
    if min.is_some_and(|min| n < min) || max.is_some_and(|max| n > max) {
        return Err(SchemaError::at(
            path,
            Violation::OutOfRange {
                value: n.to_string(),
                range: describe_range(min, max),
            },
        ));
    }
    Ok(())
}

fn check_length(
    length: usize,
    min: Option<usize>,
    max: Option<usize>,
    path: &str,
) -> Result<(), SchemaError> {
    if min.is_some_and(|min| length < min) || max.is_some_and(|max| length > max) {
        return Err(SchemaError::at(
            path,
            Violation::Length {
                length,
                range: describe_range(min, max),
            },
        ));
    }
    Ok(())
}

/// Whole numbers, including `u64` beyond `i64::MAX` and floats such as `80.0`
fn as_integer(value: &Value) -> Option<i128> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(n) = number.as_i64() {
        return Some(i128::from(n));
    }
    if let Some(n) = number.as_u64() {
        return Some(i128::from(n));
    }
    number
        .as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 1e36)
        .map(|f| f as i128)
}

fn describe_range<T: std::fmt::Display>(min: Option<T>, max: Option<T>) -> String {
    let lower = min.map(|m| m.to_string()).unwrap_or_else(|| "-inf".to_string());
    let upper = max.map(|m| m.to_string()).unwrap_or_else(|| "inf".to_string());
    format!("[{}, {}]", lower, upper)
}

fn field_path(parent: &str, name: &str) -> String {
    format!("{}.{}", parent, name)
}

/// Short JSON type name used in error messages
pub fn type_name(value: &Value) -> &'static str {
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

impl Contract {
    /// An object contract with the given required fields and no other rules
    pub fn object_with_required(required: &[&str]) -> Self {
        Contract::Object {
            properties: BTreeMap::new(),
            required: required.iter().map(|s| s.to_string()).collect(),
            additional: true,
        }
    }

    /// Check the contract itself for contradictions (e.g. `minimum > maximum`)
    pub fn check_well_formed(&self) -> Result<(), String> {
        match self {
            Contract::String {
                min_length: Some(min),
                max_length: Some(max),
            } if min > max => Err(format!("min_length {} exceeds max_length {}", min, max)),
            Contract::Number {
                minimum: Some(min),
                maximum: Some(max),
            } if min > max => Err(format!("minimum {} exceeds maximum {}", min, max)),
            Contract::Integer {
                minimum: Some(min),
                maximum: Some(max),
            } if min > max => Err(format!("minimum {} exceeds maximum {}", min, max)),
            Contract::Enum { values } if values.is_empty() => {
                Err("enum declares no values".to_string())
            }
            Contract::Array {
                items,
                min_items,
                max_items,
            } => {
                if let (Some(min), Some(max)) = (min_items, max_items) {
                    if min > max {
                        return Err(format!("min_items {} exceeds max_items {}", min, max));
                    }
                }
                items.check_well_formed()
            }
            Contract::Object {
                properties,
                required,
                additional,
            } => {
                if !additional {
                    if let Some(name) = required.iter().find(|r| !properties.contains_key(*r)) {
                        return Err(format!(
                            "required field '{}' is not declared while additional fields are disallowed",
                            name
                        ));
                    }
                }
                for (name, contract) in properties {
                    contract
                        .check_well_formed()
                        .map_err(|e| format!("{}: {}", name, e))?;
                }
                Ok(())
            }
            Contract::OneOf { variants } => {
                if variants.is_empty() {
                    return Err("one_of declares no variants".to_string());
                }
                variants.iter().try_for_each(|v| v.check_well_formed())
            }
            _ => Ok(()),
        }
    }
}
