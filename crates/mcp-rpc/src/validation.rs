//! Parameter validation against an action schema.
//!
//! [`validate`] is pure and accumulates every failure instead of stopping at
//! the first one. An explicit `null` for an optional parameter counts as
//! absent; for a required parameter it counts as missing.

use mcp_core::ActionSchema;
use serde_json::Value;

use crate::errors::{HandlerError, SANITIZED_INTERNAL_MESSAGE};
use crate::types::Params;

/// Outcome of [`validate`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Whether `errors` is empty.
    pub valid: bool,
    /// One message per failure.
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// All errors joined for a single response message.
    pub fn message(&self) -> String {
        self.errors.join("; ")
    }
}

/// Check `params` against `schema`.
///
/// Failures are reported in a stable order: missing required parameters,
/// then unknown parameters, then type mismatches, each sorted by name.
pub fn validate(schema: &ActionSchema, params: &Params) -> ValidationReport {
    let mut missing = Vec::new();
    let mut unknown = Vec::new();
    let mut mismatched = Vec::new();

    for (name, spec) in &schema.param_specs {
        if spec.required && params.get(name).is_none_or(Value::is_null) {
            missing.push(format!("Missing required parameter: {name}"));
        }
    }

    for (name, value) in params {
        let Some(spec) = schema.param_specs.get(name) else {
            unknown.push(format!("Unknown parameter: {name}"));
            continue;
        };
        if value.is_null() {
            continue;
        }
        if !spec.param_type.matches(value) {
            mismatched.push(format!(
                "Parameter '{name}' must be of type {}, got {}",
                spec.param_type,
                json_type_name(value)
            ));
        }
    }

    missing.sort();
    unknown.sort();
    mismatched.sort();

    let errors: Vec<String> = missing.into_iter().chain(unknown).chain(mismatched).collect();
    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

/// Fill omitted (or `null`) parameters that declare a default.
pub fn apply_defaults(schema: &ActionSchema, params: &mut Params) {
    for (name, spec) in &schema.param_specs {
        let Some(default) = &spec.default else {
            continue;
        };
        if params.get(name).is_none_or(Value::is_null) {
            let _ = params.insert(name.clone(), default.clone());
        }
    }
}

/// Client-facing text for a handler error.
///
/// Failures a handler raised on purpose keep their message; internal faults are replaced so
/// paths and driver errors never reach the client.
pub fn sanitize_error_message(err: &HandlerError) -> String {
    match err {
        HandlerError::InvalidParams { message }
        | HandlerError::AuthRequired { message }
        | HandlerError::PermissionDenied { message }
        | HandlerError::NotFound { message }
        | HandlerError::Failed { message } => message.clone(),
        HandlerError::Internal { .. } => SANITIZED_INTERNAL_MESSAGE.to_string(),
    }
}

/// JSON type name as reported in validation messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
