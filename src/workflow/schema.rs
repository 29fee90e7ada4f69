//! Input Schema Validation
//!
//! Checks request input against declared parameters, filling in declared
//! defaults first. Every problem is collected so the caller sees the full
//! list of missing, unexpected and mistyped fields at once.

use std::fmt;

use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};

use super::model::{InputSchema, ParameterType};

/// A field whose value has the wrong JSON type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MistypedField {
    pub name: String,
    pub expected: ParameterType,
    pub actual: String,
}

/// Everything wrong with a request's input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputValidationReport {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub mistyped: Vec<MistypedField>,
}

impl InputValidationReport {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.mistyped.is_empty()
    }
}

impl fmt::Display for InputValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing required: {}", self.missing.join(", ")));
        }
        if !self.extra.is_empty() {
            parts.push(format!("unexpected: {}", self.extra.join(", ")));
        }
        if !self.mistyped.is_empty() {
            let fields: Vec<String> = self
                .mistyped
                .iter()
                .map(|m| format!("{} (expected {}, got {})", m.name, m.expected, m.actual))
                .collect();
            parts.push(format!("wrong type: {}", fields.join(", ")));
        }
        write!(f, "{}", parts.join("; "))
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validates `input` against `schema` and returns the effective input.
///
/// Omitted (or null) parameters take their declared default. A required
/// parameter with neither a value nor a default is reported missing; names
/// the schema does not declare are reported as extra.
///
/// # Example
///
/// ```
/// use orchestra::workflow::{validate_input, InputSchema, ParameterSpec, ParameterType};
/// use serde_json::{json, Map};
///
/// let mut schema = InputSchema::new();
/// schema.insert(
///     "who".to_string(),
///     ParameterSpec::new(ParameterType::String).with_default(json!("Stanley")),
/// );
///
/// let input = validate_input(&schema, &Map::new()).unwrap();
/// assert_eq!(input["who"], json!("Stanley"));
/// ```
pub fn validate_input(
    schema: &InputSchema,
    input: &Map<String, Value>,
) -> Result<Map<String, Value>, InputValidationReport> {
    let mut report = InputValidationReport::default();
    let mut effective = Map::new();

    for (name, spec) in schema {
        let value = match input.get(name) {
            Some(Value::Null) | None => spec.default.clone(),
            Some(value) => Some(value.clone()),
        };

        match value {
            Some(value) if spec.kind.accepts(&value) => {
                effective.insert(name.clone(), value);
            }
            Some(value) => report.mistyped.push(MistypedField {
                name: name.clone(),
                expected: spec.kind,
                actual: json_type_name(&value).to_string(),
            }),
            None if spec.required => report.missing.push(name.clone()),
            None => debug!("Optional parameter '{}' left unset", name),
        }
    }

    report.extra = input
        .keys()
        .filter(|k| !schema.contains_key(*k))
        .cloned()
        .collect();

    if report.is_empty() {
        Ok(effective)
    } else {
        Err(report)
    }
}
