//! Per-property transform steps (filters and validators)

use crate::value::Value;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One named step in a property's transform pipeline.
///
/// Steps are attached once when the record type's schema is declared.
/// Filters rewrite the incoming value; validators reject it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Strip leading/trailing whitespace from text
    Trim,
    Lowercase,
    Uppercase,
    /// Turn empty text into NULL
    NullIfEmpty,
    NotNull,
    NotEmpty,
    /// Maximum text length in characters
    MaxLength(usize),
    /// Inclusive integer range
    Range { min: i64, max: i64 },
}

impl Transform {
    pub fn name(&self) -> &'static str {
        match self {
            Transform::Trim => "trim",
            Transform::Lowercase => "lowercase",
            Transform::Uppercase => "uppercase",
            Transform::NullIfEmpty => "null_if_empty",
            Transform::NotNull => "not_null",
            Transform::NotEmpty => "not_empty",
            Transform::MaxLength(_) => "max_length",
            Transform::Range { .. } => "range",
        }
    }

    pub fn is_validator(&self) -> bool {
        matches!(
            self,
            Transform::NotNull | Transform::NotEmpty | Transform::MaxLength(_) | Transform::Range { .. }
        )
    }

    fn filter(&self, value: Value) -> Value {
        match (self, value) {
            (Transform::Trim, Value::Text(s)) => Value::Text(s.trim().to_string()),
            (Transform::Lowercase, Value::Text(s)) => Value::Text(s.to_lowercase()),
            (Transform::Uppercase, Value::Text(s)) => Value::Text(s.to_uppercase()),
            (Transform::NullIfEmpty, Value::Text(s)) if s.is_empty() => Value::Null,
            (_, other) => other,
        }
    }

    fn validate(&self, property: &str, value: &Value) -> Result<()> {
        let failure = match (self, value) {
            (Transform::NotNull, Value::Null) => Some("must not be null".to_string()),
            (Transform::NotEmpty, Value::Null) => Some("must not be empty".to_string()),
            (Transform::NotEmpty, Value::Text(s)) if s.is_empty() => Some("must not be empty".to_string()),
            (Transform::NotEmpty, Value::Blob(b)) if b.is_empty() => Some("must not be empty".to_string()),
            (Transform::MaxLength(max), Value::Text(s)) if s.chars().count() > *max => {
                Some(format!("longer than {} characters", max))
            }
            (Transform::Range { min, max }, v) => match v.as_i64() {
                Some(n) if n < *min || n > *max => Some(format!("{} outside {}..={}", n, min, max)),
                None if !v.is_null() => Some(format!("{} is not an integer", v.type_name())),
                _ => None,
            },
            _ => None,
        };

        match failure {
            Some(reason) => Err(Error::Validation {
                property: property.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Run a property's pipeline: every filter in declared order, then every validator.
pub fn apply_steps(property: &str, steps: &[Transform], value: Value) -> Result<Value> {
    let value = steps
        .iter()
        .filter(|s| !s.is_validator())
        .fold(value, |v, step| step.filter(v));

    for step in steps.iter().filter(|s| s.is_validator()) {
        step.validate(property, &value)?;
    }
    Ok(value)
}
